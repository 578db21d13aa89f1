// Bulk restore reducers for disaster recovery
// Accept JSON arrays exported from admin panel (TypeScript SDK format)

use spacetimedb::{reducer, ReducerContext, Timestamp, log, Table};
use crate::{Event, Donation, Guess, ProAccess, PaymentMethod, authorized_worker};
use crate::{event, donation, guess, pro_access};
use chrono::DateTime;
use serde_json::Value;

/// Parse Timestamp from SDK JSON format {"__timestamp_micros_since_unix_epoch__": "123456"}
/// or an RFC 3339 string (event exports carry ISO-8601 from the admin panel)
fn parse_timestamp_json(val: &Value) -> Result<Timestamp, String> {
    if let Some(s) = val.as_str() {
        let parsed = DateTime::parse_from_rfc3339(s)
            .map_err(|e| format!("Invalid RFC 3339 timestamp: {}", e))?;
        return Ok(Timestamp::from_micros_since_unix_epoch(parsed.timestamp_micros()));
    }

    let micros_str = val.get("__timestamp_micros_since_unix_epoch__")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid timestamp field")?;

    let micros: i64 = micros_str.parse()
        .map_err(|e| format!("Invalid timestamp micros: {}", e))?;

    Ok(Timestamp::from_micros_since_unix_epoch(micros))
}

/// SDK exports u64 columns as decimal strings; accept raw numbers too
fn parse_u64(val: &Value) -> Option<u64> {
    val.as_u64().or_else(|| val.as_str().and_then(|s| s.parse().ok()))
}

fn parse_payment_method(val: Option<&Value>) -> Result<PaymentMethod, String> {
    match val.and_then(|v| v.as_str()) {
        Some("zelle") => Ok(PaymentMethod::Zelle),
        Some("venmo") => Ok(PaymentMethod::Venmo),
        other => Err(format!("Invalid payment method: {:?}", other)),
    }
}

/// Bulk restore event table from JSON array
/// Protected by authorization check - only authorized workers can call this
#[reducer]
pub fn bulk_restore_event(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    // Authorization check: only authorized workers can restore data
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        log::warn!("Unauthorized bulk_restore_event attempt by {}", ctx.sender);
        return Err("Unauthorized".to_string());
    }

    let data: Value = serde_json::from_str(&json_data)
        .map_err(|e| format!("Invalid JSON: {}", e))?;

    let events = data.as_array()
        .ok_or("Expected JSON array of events")?;

    let mut count = 0;
    for (i, e) in events.iter().enumerate() {
        let charity_ids: Vec<String> = e.get("charityIds")
            .and_then(|v| v.as_array())
            .ok_or(format!("Event {}: missing or invalid charityIds", i))?
            .iter()
            .map(|v| v.as_str().map(|s| s.to_string()).ok_or(format!("Event {}: invalid charity id", i)))
            .collect::<Result<Vec<_>, _>>()?;

        let event = Event {
            id: e.get("id").and_then(parse_u64).ok_or(format!("Event {}: missing id", i))?,
            name: e.get("name").and_then(|v| v.as_str()).ok_or(format!("Event {}: missing name", i))?.to_string(),
            description: e.get("description").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            start: parse_timestamp_json(e.get("start").ok_or(format!("Event {}: missing start", i))?)?,
            end: parse_timestamp_json(e.get("end").ok_or(format!("Event {}: missing end", i))?)?,
            registration_opens_at: parse_timestamp_json(e.get("registrationOpensAt").ok_or(format!("Event {}: missing registrationOpensAt", i))?)?,
            entry_fee: e.get("entryFee").and_then(|v| v.as_f64()).ok_or(format!("Event {}: missing entryFee", i))?,
            pro_fee: e.get("proFee").and_then(|v| v.as_f64()).unwrap_or(0.0),
            is_active: e.get("isActive").and_then(|v| v.as_bool()).ok_or(format!("Event {}: missing isActive", i))?,
            charity_ids,
            final_peak_orders: e.get("finalPeakOrders").and_then(parse_u64),
            created_by: e.get("createdBy").and_then(|v| v.as_str()).ok_or(format!("Event {}: missing createdBy", i))?.to_string(),
            created_at: parse_timestamp_json(e.get("createdAt").ok_or(format!("Event {}: missing createdAt", i))?)?,
        };

        ctx.db.event().insert(event);
        count += 1;
    }

    log::info!("✅ Restored {} event records", count);
    Ok(())
}

/// Bulk restore donation table from JSON array
/// Protected by authorization check - only authorized workers can call this
#[reducer]
pub fn bulk_restore_donation(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    // Authorization check: only authorized workers can restore data
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        log::warn!("Unauthorized bulk_restore_donation attempt by {}", ctx.sender);
        return Err("Unauthorized".to_string());
    }

    let data: Value = serde_json::from_str(&json_data)
        .map_err(|e| format!("Invalid JSON: {}", e))?;

    let donations = data.as_array()
        .ok_or("Expected JSON array of donations")?;

    let mut count = 0;
    for (i, d) in donations.iter().enumerate() {
        let donation = Donation {
            id: d.get("id").and_then(parse_u64).ok_or(format!("Donation {}: missing id", i))?,
            user_id: d.get("userId").and_then(|v| v.as_str()).ok_or(format!("Donation {}: missing userId", i))?.to_string(),
            event_id: d.get("eventId").and_then(parse_u64).ok_or(format!("Donation {}: missing eventId", i))?,
            amount: d.get("amount").and_then(|v| v.as_f64()).ok_or(format!("Donation {}: missing amount", i))?,
            method: parse_payment_method(d.get("paymentMethod"))
                .map_err(|e| format!("Donation {}: {}", i, e))?,
            note: d.get("paymentNote").and_then(|v| v.as_str()).map(|s| s.to_string()),
            is_paid: d.get("isPaid").and_then(|v| v.as_bool()).ok_or(format!("Donation {}: missing isPaid", i))?,
            created_at: parse_timestamp_json(d.get("createdAt").ok_or(format!("Donation {}: missing createdAt", i))?)?,
            user_name: d.get("userName").and_then(|v| v.as_str()).map(|s| s.to_string()),
        };

        ctx.db.donation().insert(donation);
        count += 1;
    }

    log::info!("✅ Restored {} donation records", count);
    Ok(())
}

/// Bulk restore guess table from JSON array
/// Protected by authorization check - only authorized workers can call this
#[reducer]
pub fn bulk_restore_guess(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    // Authorization check: only authorized workers can restore data
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        log::warn!("Unauthorized bulk_restore_guess attempt by {}", ctx.sender);
        return Err("Unauthorized".to_string());
    }

    let data: Value = serde_json::from_str(&json_data)
        .map_err(|e| format!("Invalid JSON: {}", e))?;

    let guesses = data.as_array()
        .ok_or("Expected JSON array of guesses")?;

    let mut count = 0;
    for (i, g) in guesses.iter().enumerate() {
        let guess = Guess {
            id: g.get("id").and_then(parse_u64).ok_or(format!("Guess {}: missing id", i))?,
            event_id: g.get("eventId").and_then(parse_u64).ok_or(format!("Guess {}: missing eventId", i))?,
            user_id: g.get("userId").and_then(|v| v.as_str()).ok_or(format!("Guess {}: missing userId", i))?.to_string(),
            value: g.get("value").and_then(parse_u64).ok_or(format!("Guess {}: missing value", i))?,
            total_donation: g.get("totalDonation").and_then(|v| v.as_f64()).ok_or(format!("Guess {}: missing totalDonation", i))?,
            method: parse_payment_method(g.get("paymentMethod"))
                .map_err(|e| format!("Guess {}: {}", i, e))?,
            note: g.get("paymentNote").and_then(|v| v.as_str()).map(|s| s.to_string()),
            is_paid: g.get("isPaid").and_then(|v| v.as_bool()).ok_or(format!("Guess {}: missing isPaid", i))?,
            charity_id: g.get("charityId").and_then(|v| v.as_str()).map(|s| s.to_string()),
            created_at: parse_timestamp_json(g.get("createdAt").ok_or(format!("Guess {}: missing createdAt", i))?)?,
            user_name: g.get("userName").and_then(|v| v.as_str()).map(|s| s.to_string()),
            team: g.get("team").and_then(|v| v.as_str()).map(|s| s.to_string()),
        };

        ctx.db.guess().insert(guess);
        count += 1;
    }

    log::info!("✅ Restored {} guess records", count);
    Ok(())
}

/// Bulk restore pro_access table from JSON array
/// Protected by authorization check - only authorized workers can call this
#[reducer]
pub fn bulk_restore_pro_access(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    // Authorization check: only authorized workers can restore data
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        log::warn!("Unauthorized bulk_restore_pro_access attempt by {}", ctx.sender);
        return Err("Unauthorized".to_string());
    }

    let data: Value = serde_json::from_str(&json_data)
        .map_err(|e| format!("Invalid JSON: {}", e))?;

    let grants = data.as_array()
        .ok_or("Expected JSON array of pro_access records")?;

    let mut count = 0;
    for (i, p) in grants.iter().enumerate() {
        let grant = ProAccess {
            id: p.get("id").and_then(parse_u64).ok_or(format!("ProAccess {}: missing id", i))?,
            event_id: p.get("eventId").and_then(parse_u64).ok_or(format!("ProAccess {}: missing eventId", i))?,
            user_id: p.get("userId").and_then(|v| v.as_str()).ok_or(format!("ProAccess {}: missing userId", i))?.to_string(),
            granted_at: parse_timestamp_json(p.get("grantedAt").ok_or(format!("ProAccess {}: missing grantedAt", i))?)?,
        };

        ctx.db.pro_access().insert(grant);
        count += 1;
    }

    log::info!("✅ Restored {} pro_access records", count);
    Ok(())
}
