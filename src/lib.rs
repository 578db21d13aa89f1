use spacetimedb::{
    ReducerContext, Identity, Table, Timestamp,
    table, reducer, view, SpacetimeType,
    client_visibility_filter, Filter,
};
use std::cmp::Ordering;
use std::fmt;

// Static seed data (charity catalog, historical peak-order series)
mod catalog;

// Bulk restore reducers for disaster recovery
mod restore;

// ==================== CONSTANTS ====================

/// Entry fee of the seeded demo event (dollars)
const SEED_ENTRY_FEE: f64 = 10.0;

/// Pro fee of the seeded demo event (dollars, on top of the entry fee)
const SEED_PRO_FEE: f64 = 30.0;

/// Seeded demo event runs for one week
const SEED_EVENT_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

/// Registration for the seeded demo event opens one hour after publish
const SEED_REGISTRATION_DELAY_SECS: u64 = 60 * 60;

/// Leaderboard bucket for guesses whose submitter gave no team name
const UNASSIGNED_TEAM: &str = "Unassigned";

/// Suggested-guess range: last year's peak scaled by projected growth
const GROWTH_FACTOR_LOW: f64 = 1.05;
const GROWTH_FACTOR_HIGH: f64 = 1.25;

// ==================== ERROR TAXONOMY ====================

/// Everything a ledger command can reject with. All of these are expected,
/// user-correctable conditions - reducers convert them to their `String`
/// error at the boundary and never panic on them.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// Malformed input; the operation aborted with no state change
    Validation(String),
    /// A second guess for the same (user, event); the first guess is untouched
    DuplicateGuess,
    /// Eligibility check failed; carries the reason and the exact dollar shortfall
    NotEligible { reason: String, shortfall: f64 },
    /// Operation referenced an unknown record id
    NotFound { entity: &'static str, id: u64 },
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::Validation(msg) => write!(f, "{}", msg),
            LedgerError::DuplicateGuess => write!(
                f,
                "You already submitted a guess for this event. You can still donate more from the leaderboard."
            ),
            LedgerError::NotEligible { reason, shortfall } => {
                if *shortfall > 0.0 {
                    write!(f, "{} (${:.2} more needed)", reason, shortfall)
                } else {
                    write!(f, "{}", reason)
                }
            }
            LedgerError::NotFound { entity, id } => write!(f, "{} {} not found", entity, id),
        }
    }
}

impl From<LedgerError> for String {
    fn from(err: LedgerError) -> Self {
        err.to_string()
    }
}

// ==================== HELPER FUNCTIONS ====================

/// Get the logged-in user from the sender's session
/// This abstracts the session lookup pattern used throughout reducers
fn get_user(ctx: &ReducerContext) -> Result<User, String> {
    let session = ctx.db.session()
        .connection_id()
        .find(&ctx.sender)
        .ok_or("No session found - log in first".to_string())?;

    ctx.db.user()
        .id()
        .find(&session.user_id)
        .ok_or("User not found".to_string())
}

/// The system's current event: the first (lowest-id) event flagged active
fn find_active_event(ctx: &ReducerContext) -> Result<Event, String> {
    ctx.db.event()
        .iter()
        .filter(|e| e.is_active)
        .min_by_key(|e| e.id)
        .ok_or("No active event right now".to_string())
}

/// All donations the user has on file, as a slice for the pure rules
fn user_donations(ctx: &ReducerContext, user_id: &String) -> Vec<Donation> {
    ctx.db.donation().user_id().filter(user_id).collect()
}

// ==================== TABLES ====================

/// Session links an ephemeral connection to the guest user it created
/// PRIVATE: connection identity mapping only, clients use the my_user view
#[table(name = session)]
pub struct Session {
    #[primary_key]
    pub connection_id: Identity,

    /// Guest user id (the connection identity rendered as hex)
    pub user_id: String,

    /// When this session was created
    pub connected_at: Timestamp,
}

/// Guest user created at login and destroyed at logout/disconnect.
/// Donations and guesses carry their own user_name copy, so records
/// outlive the user row that created them.
/// PRIVATE: clients access their own row via the my_user view
#[table(name = user)]
#[derive(Clone)]
pub struct User {
    #[primary_key]
    pub id: String,

    /// Display name entered at login
    pub name: String,

    /// Optional team name, the grouping key for the team leaderboard
    pub team: Option<String>,

    pub logged_in_at: Timestamp,
}

/// View: returns only the caller's own user row
#[view(name = my_user, public)]
fn my_user(ctx: &spacetimedb::ViewContext) -> Option<User> {
    let session = ctx.db.session().connection_id().find(ctx.sender)?;
    ctx.db.user().id().find(&session.user_id)
}

/// Identities allowed to perform admin actions (confirming payments,
/// setting the final number, activating events, bulk restore).
/// The module owner is enrolled at init.
#[table(name = authorized_worker)]
pub struct AuthorizedWorker {
    #[primary_key]
    pub identity: Identity,
}

/// Charity catalog entry - reference data, never mutated by users
#[table(name = charity, public)]
#[derive(Clone)]
pub struct Charity {
    #[primary_key]
    pub id: String,

    pub name: String,
    pub description: String,
    pub url: String,
    pub category: String,
}

/// Historical peak-order data point
/// PRIVATE: pro content, exposed only through the pro_history/pro_insights views
#[table(name = historical_peak)]
#[derive(Clone)]
pub struct HistoricalPeak {
    #[primary_key]
    pub year: u32,

    pub peak_orders: u64,
}

/// A fundraiser event. Created pending approval (is_active = false);
/// activation and the final peak-order number are admin decisions.
#[table(name = event, public)]
#[derive(Clone)]
pub struct Event {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    pub name: String,
    pub description: String,

    /// Event window
    pub start: Timestamp,
    pub end: Timestamp,

    /// When users can start entering guesses
    pub registration_opens_at: Timestamp,

    /// Minimum confirmed donation before a guess may be submitted (dollars)
    pub entry_fee: f64,

    /// Additional confirmed donation unlocking pro insights (dollars)
    pub pro_fee: f64,

    pub is_active: bool,

    /// Charities associated with this event
    pub charity_ids: Vec<String>,

    /// The true final number once leadership publishes it. None = not yet decided.
    /// Write-once: never updated after it is set.
    pub final_peak_orders: Option<u64>,

    /// User id of whoever created the event
    pub created_by: String,

    pub created_at: Timestamp,
}

/// Payment rails the fundraiser accepts. Transfers happen outside the
/// system; an admin flips is_paid once the money shows up.
#[derive(SpacetimeType, Debug, Clone, PartialEq)]
pub enum PaymentMethod {
    Zelle,
    Venmo,
}

/// A claimed donation. Unconfirmed (is_paid = false) until an admin
/// verifies the transfer; only confirmed donations count toward
/// eligibility. Immutable once created except for the is_paid flag.
#[table(name = donation, public)]
#[derive(Clone)]
pub struct Donation {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub user_id: String,

    #[index(btree)]
    pub event_id: u64,

    /// Claimed amount in dollars, always > 0
    pub amount: f64,

    pub method: PaymentMethod,

    /// Free-text payment note (e.g. the Zelle/Venmo memo)
    pub note: Option<String>,

    /// Set by an admin once the external transfer is verified
    pub is_paid: bool,

    pub created_at: Timestamp,

    /// Display name captured at creation (user rows are ephemeral)
    pub user_name: Option<String>,
}

/// A user's prediction for an event. At most one per (user_id, event_id);
/// a second submission is rejected, never overwritten.
#[table(name = guess, public)]
#[derive(Clone)]
pub struct Guess {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub event_id: u64,

    #[index(btree)]
    pub user_id: String,

    /// The predicted peak order count
    pub value: u64,

    /// Running donation total tied to this entry: starts at the event's
    /// entry fee and grows via add_donation_to_guess
    pub total_donation: f64,

    pub method: PaymentMethod,
    pub note: Option<String>,

    /// Set by an admin once the entry payment is verified
    pub is_paid: bool,

    /// Charity the entry's donations are directed to
    pub charity_id: Option<String>,

    pub created_at: Timestamp,

    /// Display name and team captured at creation (user rows are ephemeral)
    pub user_name: Option<String>,
    pub team: Option<String>,
}

/// Pro access grant - the existence of a row is the capability.
/// At most one per (user_id, event_id).
#[table(name = pro_access, public)]
pub struct ProAccess {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub event_id: u64,

    #[index(btree)]
    pub user_id: String,

    pub granted_at: Timestamp,
}

/// Grouping key for the donation leaderboard. Team-based and individual
/// leaderboards are the same computation with a different key.
#[derive(SpacetimeType, Debug, Clone, PartialEq)]
pub enum LeaderboardGrouping {
    ByTeam,
    ByUser,
}

/// Singleton configuration row (id is always 0)
#[table(name = leaderboard_config, public)]
pub struct LeaderboardConfig {
    #[primary_key]
    pub id: u8,

    pub grouping: LeaderboardGrouping,
}

/// Materialized donation leaderboard, rebuilt whenever a confirmed
/// guess total changes
#[table(name = leaderboard_entry, public)]
pub struct LeaderboardEntry {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub event_id: u64,

    /// 1-based position; ties keep first-seen submission order
    pub position: u32,

    /// Team or user display name depending on the configured grouping
    pub label: String,

    pub total_donated: f64,
}

/// Materialized closest-guess standings, written once when the final
/// peak-order number is published. Frozen at publication time.
#[table(name = closest_rank, public)]
pub struct ClosestRank {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub event_id: u64,

    /// 1-based rank; position 1 is the winner
    pub position: u32,

    pub guess_id: u64,
    pub user_name: Option<String>,
    pub team: Option<String>,
    pub value: u64,

    /// Absolute distance to the published final number
    pub distance: u64,

    pub total_donation: f64,
}

// ==================== ROW LEVEL SECURITY ====================

/// RLS Filter: users see their own donations (payment notes are sensitive)
#[client_visibility_filter]
const DONATION_OWNER_VISIBILITY: Filter = Filter::Sql(
    "SELECT d.* FROM donation d
     JOIN session s WHERE s.connection_id = :sender AND d.user_id = s.user_id"
);

/// RLS Filter: admins see every donation so they can confirm payments
#[client_visibility_filter]
const DONATION_ADMIN_VISIBILITY: Filter = Filter::Sql(
    "SELECT d.* FROM donation d
     JOIN authorized_worker aw WHERE aw.identity = :sender"
);

// ==================== VIEWS ====================

/// View: the system's current event (first active one), if any
#[view(name = active_event, public)]
fn active_event(ctx: &spacetimedb::ViewContext) -> Option<Event> {
    ctx.db.event().iter().filter(|e| e.is_active).min_by_key(|e| e.id)
}

/// View: the leading entry of the closest-guess contest once the final
/// number is published. None until then.
#[view(name = current_leader, public)]
fn current_leader(ctx: &spacetimedb::ViewContext) -> Option<ClosestRank> {
    let event = ctx.db.event().iter().filter(|e| e.is_active).min_by_key(|e| e.id)?;
    event.final_peak_orders?;
    ctx.db.closest_rank()
        .iter()
        .filter(|r| r.event_id == event.id)
        .min_by_key(|r| r.position)
}

/// View: historical peak-order data, only for callers holding pro access
/// for the active event. Empty for everyone else.
#[view(name = pro_history, public)]
fn pro_history(ctx: &spacetimedb::ViewContext) -> Vec<HistoricalPeak> {
    let Some(session) = ctx.db.session().connection_id().find(ctx.sender) else {
        return Vec::new();
    };
    let Some(event) = ctx.db.event().iter().filter(|e| e.is_active).min_by_key(|e| e.id) else {
        return Vec::new();
    };
    let entitled = ctx.db.pro_access()
        .iter()
        .any(|p| p.user_id == session.user_id && p.event_id == event.id);
    if !entitled {
        return Vec::new();
    }
    let mut points: Vec<HistoricalPeak> = ctx.db.historical_peak().iter().collect();
    points.sort_by_key(|p| p.year);
    points
}

/// Derived statistics served to pro users alongside the raw history
#[derive(SpacetimeType, Debug, Clone)]
pub struct ProInsights {
    pub average: f64,
    pub min: u64,
    pub max: u64,
    pub suggested_low: u64,
    pub suggested_high: u64,
}

/// View: quick stats and the suggested guess range, gated like pro_history
#[view(name = pro_insights, public)]
fn pro_insights(ctx: &spacetimedb::ViewContext) -> Option<ProInsights> {
    let session = ctx.db.session().connection_id().find(ctx.sender)?;
    let event = ctx.db.event().iter().filter(|e| e.is_active).min_by_key(|e| e.id)?;
    ctx.db.pro_access()
        .iter()
        .find(|p| p.user_id == session.user_id && p.event_id == event.id)?;

    let points: Vec<HistoricalPeak> = ctx.db.historical_peak().iter().collect();
    let stats = history_stats(&points)?;
    let (suggested_low, suggested_high) = suggested_range(&points)?;
    Some(ProInsights {
        average: stats.average,
        min: stats.min,
        max: stats.max,
        suggested_low,
        suggested_high,
    })
}

// ==================== ELIGIBILITY RULES ====================
// Pure functions over row snapshots. No database access, no clock access -
// callers pass `now`, so the UI can poll the same checks without side effects.

/// Outcome of an eligibility check. `shortfall` is the exact additional
/// confirmed donation (dollars) that would flip a denial, 0 when the
/// denial is not about money (or the check passed).
#[derive(Debug, Clone, PartialEq)]
pub struct AccessCheck {
    pub allowed: bool,
    pub reason: Option<String>,
    pub shortfall: f64,
}

impl AccessCheck {
    fn granted() -> Self {
        AccessCheck { allowed: true, reason: None, shortfall: 0.0 }
    }

    fn denied(reason: impl Into<String>, shortfall: f64) -> Self {
        AccessCheck { allowed: false, reason: Some(reason.into()), shortfall }
    }
}

/// Registration opens at `registration_opens_at`, boundary inclusive
pub fn is_registration_open(event: &Event, now: Timestamp) -> bool {
    now.to_micros_since_unix_epoch() >= event.registration_opens_at.to_micros_since_unix_epoch()
}

/// Whether `now` falls inside the event window (both ends inclusive)
pub fn is_event_live(event: &Event, now: Timestamp) -> bool {
    let now = now.to_micros_since_unix_epoch();
    now >= event.start.to_micros_since_unix_epoch()
        && now <= event.end.to_micros_since_unix_epoch()
}

/// Sum of the user's CONFIRMED donations for an event. Unconfirmed claims
/// never count toward eligibility.
pub fn confirmed_donation_total(user_id: &str, event_id: u64, donations: &[Donation]) -> f64 {
    donations
        .iter()
        .filter(|d| d.user_id == user_id && d.event_id == event_id && d.is_paid)
        .map(|d| d.amount)
        .sum()
}

/// Sum of the user's donations for an event including unconfirmed claims.
/// Display only (progress bars) - gating always uses the confirmed total.
pub fn claimed_donation_total(user_id: &str, event_id: u64, donations: &[Donation]) -> f64 {
    donations
        .iter()
        .filter(|d| d.user_id == user_id && d.event_id == event_id)
        .map(|d| d.amount)
        .sum()
}

/// Can this user submit a guess? Checks the registration window first,
/// then the entry-fee threshold against confirmed donations.
pub fn can_guess(user_id: &str, event: &Event, donations: &[Donation], now: Timestamp) -> AccessCheck {
    if !is_registration_open(event, now) {
        return AccessCheck::denied("Registration has not yet opened for this event", 0.0);
    }

    let confirmed = confirmed_donation_total(user_id, event.id, donations);
    if confirmed < event.entry_fee {
        let shortfall = (event.entry_fee - confirmed).max(0.0);
        return AccessCheck::denied(
            format!("You must donate at least ${:.2} to participate", event.entry_fee),
            shortfall,
        );
    }

    AccessCheck::granted()
}

/// Can this user unlock pro insights? Re-applies can_guess, then requires
/// entry fee + pro fee in confirmed donations.
pub fn can_access_pro(user_id: &str, event: &Event, donations: &[Donation], now: Timestamp) -> AccessCheck {
    let guess_check = can_guess(user_id, event, donations, now);
    if !guess_check.allowed {
        return guess_check;
    }

    let confirmed = confirmed_donation_total(user_id, event.id, donations);
    let required = event.entry_fee + event.pro_fee;
    if confirmed < required {
        return AccessCheck::denied(
            format!("Pro access requires a total donation of ${:.2}", required),
            (required - confirmed).max(0.0),
        );
    }

    AccessCheck::granted()
}

/// True when the user already holds a guess for the event
/// (at most one guess per user per event)
pub fn has_guess(user_id: &str, event_id: u64, guesses: &[Guess]) -> bool {
    guesses.iter().any(|g| g.user_id == user_id && g.event_id == event_id)
}

/// Validate the user-supplied fields of a new event
pub fn validate_event_fields(
    name: &str,
    start: Timestamp,
    end: Timestamp,
    registration_opens_at: Timestamp,
    entry_fee: f64,
    pro_fee: f64,
) -> Result<(), LedgerError> {
    if name.trim().is_empty() {
        return Err(LedgerError::Validation("event name is required".to_string()));
    }
    if start.to_micros_since_unix_epoch() >= end.to_micros_since_unix_epoch() {
        return Err(LedgerError::Validation("event start must be before event end".to_string()));
    }
    if registration_opens_at.to_micros_since_unix_epoch() >= start.to_micros_since_unix_epoch() {
        return Err(LedgerError::Validation(
            "registration must open before the event starts".to_string(),
        ));
    }
    if !(entry_fee > 0.0) {
        return Err(LedgerError::Validation("entry fee must be greater than zero".to_string()));
    }
    if !(pro_fee >= 0.0) {
        return Err(LedgerError::Validation("pro fee must not be negative".to_string()));
    }
    Ok(())
}

// ==================== RANKING ====================

/// Closest-guess comparator: ascending distance to the final number, then
/// descending donation total (bigger donor wins the tie), then ascending
/// submission time (earlier entry wins the final tie). A total order for
/// distinct (value, total_donation, created_at) tuples.
pub fn closest_guess_order(a: &Guess, b: &Guess, target: u64) -> Ordering {
    a.value
        .abs_diff(target)
        .cmp(&b.value.abs_diff(target))
        .then_with(|| b.total_donation.total_cmp(&a.total_donation))
        .then_with(|| {
            a.created_at
                .to_micros_since_unix_epoch()
                .cmp(&b.created_at.to_micros_since_unix_epoch())
        })
}

/// Full closest-guess standings; index 0 is the winner
pub fn closest_standings(mut guesses: Vec<Guess>, target: u64) -> Vec<Guess> {
    guesses.sort_by(|a, b| closest_guess_order(a, b, target));
    guesses
}

/// Donation leaderboard: confirmed guess totals grouped by the configured
/// key, descending. The sort is stable, so equal totals keep first-seen
/// submission order.
pub fn donation_standings(guesses: &[Guess], grouping: &LeaderboardGrouping) -> Vec<(String, f64)> {
    let mut totals: Vec<(String, f64)> = Vec::new();
    for g in guesses.iter().filter(|g| g.is_paid) {
        let key = match grouping {
            LeaderboardGrouping::ByTeam => {
                g.team.clone().unwrap_or_else(|| UNASSIGNED_TEAM.to_string())
            }
            LeaderboardGrouping::ByUser => {
                g.user_name.clone().unwrap_or_else(|| g.user_id.clone())
            }
        };
        match totals.iter_mut().find(|(k, _)| *k == key) {
            Some((_, total)) => *total += g.total_donation,
            None => totals.push((key, g.total_donation)),
        }
    }
    totals.sort_by(|a, b| b.1.total_cmp(&a.1));
    totals
}

/// Aggregate statistics over the historical series
pub struct HistoryStats {
    pub average: f64,
    pub min: u64,
    pub max: u64,
}

/// None when the series is empty
pub fn history_stats(points: &[HistoricalPeak]) -> Option<HistoryStats> {
    if points.is_empty() {
        return None;
    }
    let sum: u64 = points.iter().map(|p| p.peak_orders).sum();
    Some(HistoryStats {
        average: sum as f64 / points.len() as f64,
        min: points.iter().map(|p| p.peak_orders).min().unwrap_or(0),
        max: points.iter().map(|p| p.peak_orders).max().unwrap_or(0),
    })
}

/// Suggested guess range: latest year's peak scaled by the projected
/// growth factors, rounded to whole orders
pub fn suggested_range(points: &[HistoricalPeak]) -> Option<(u64, u64)> {
    let last = points.iter().max_by_key(|p| p.year)?;
    let low = (last.peak_orders as f64 * GROWTH_FACTOR_LOW).round() as u64;
    let high = (last.peak_orders as f64 * GROWTH_FACTOR_HIGH).round() as u64;
    Some((low, high))
}

/// Rebuild the materialized donation leaderboard for one event
/// (private helper, called whenever a confirmed total changes)
fn refresh_donation_leaderboard(ctx: &ReducerContext, event_id: u64) {
    let stale: Vec<u64> = ctx.db.leaderboard_entry()
        .event_id()
        .filter(&event_id)
        .map(|e| e.id)
        .collect();
    for id in stale {
        ctx.db.leaderboard_entry().id().delete(&id);
    }

    let grouping = ctx.db.leaderboard_config()
        .iter()
        .next()
        .map(|c| c.grouping)
        .unwrap_or(LeaderboardGrouping::ByTeam);

    let guesses: Vec<Guess> = ctx.db.guess().event_id().filter(&event_id).collect();
    let standings = donation_standings(&guesses, &grouping);
    for (i, (label, total)) in standings.iter().enumerate() {
        ctx.db.leaderboard_entry().insert(LeaderboardEntry {
            id: 0, // auto_inc
            event_id,
            position: (i + 1) as u32,
            label: label.clone(),
            total_donated: *total,
        });
    }

    log::info!("[LEADERBOARD] refreshed event:{} grouping:{:?} entries:{}",
        event_id, grouping, standings.len());
}

/// Materialize the closest-guess standings once the final number is known.
/// Runs once per event - the final number is write-once.
fn publish_closest_standings(ctx: &ReducerContext, event_id: u64, target: u64) {
    let stale: Vec<u64> = ctx.db.closest_rank()
        .event_id()
        .filter(&event_id)
        .map(|r| r.id)
        .collect();
    for id in stale {
        ctx.db.closest_rank().id().delete(&id);
    }

    let guesses: Vec<Guess> = ctx.db.guess().event_id().filter(&event_id).collect();
    let standings = closest_standings(guesses, target);
    for (i, g) in standings.iter().enumerate() {
        ctx.db.closest_rank().insert(ClosestRank {
            id: 0, // auto_inc
            event_id,
            position: (i + 1) as u32,
            guess_id: g.id,
            user_name: g.user_name.clone(),
            team: g.team.clone(),
            value: g.value,
            distance: g.value.abs_diff(target),
            total_donation: g.total_donation,
        });
    }

    if let Some(winner) = standings.first() {
        log::info!("[LEADERBOARD] closest-guess published event:{} target:{} winner_guess:{} value:{} distance:{}",
            event_id, target, winner.id, winner.value, winner.value.abs_diff(target));
    } else {
        log::info!("[LEADERBOARD] closest-guess published event:{} target:{} (no guesses)",
            event_id, target);
    }
}

// ==================== REDUCERS ====================

/// Guest login: creates (or refreshes) the caller's user row and session.
/// The user id is the connection identity, so a client can only ever
/// affect its own record.
#[reducer]
pub fn login(ctx: &ReducerContext, name: String, team: Option<String>) -> Result<(), String> {
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(LedgerError::Validation("display name must not be blank".to_string()).into());
    }

    let user_id = format!("{}", ctx.sender);

    // Replace a stale session on unclean reconnect (prevents PK conflict)
    if ctx.db.session().connection_id().find(&ctx.sender).is_some() {
        ctx.db.session().connection_id().delete(&ctx.sender);
    }
    ctx.db.session().insert(Session {
        connection_id: ctx.sender,
        user_id: user_id.clone(),
        connected_at: ctx.timestamp,
    });

    let kind = if let Some(mut existing) = ctx.db.user().id().find(&user_id) {
        existing.name = name.clone();
        existing.team = team.clone();
        existing.logged_in_at = ctx.timestamp;
        ctx.db.user().id().update(existing);
        "returning"
    } else {
        ctx.db.user().insert(User {
            id: user_id.clone(),
            name: name.clone(),
            team: team.clone(),
            logged_in_at: ctx.timestamp,
        });
        "new"
    };

    log::info!("[SESSION] login user:{} name:\"{}\" team:{:?} type:{}",
        &user_id[..8.min(user_id.len())], name, team, kind);
    Ok(())
}

/// Explicit logout - destroys the ephemeral user and its session
#[reducer]
pub fn logout(ctx: &ReducerContext) {
    if let Some(session) = ctx.db.session().connection_id().find(&ctx.sender) {
        if let Some(user) = ctx.db.user().id().find(&session.user_id) {
            log::info!("[SESSION] logout user:{} name:\"{}\"",
                &user.id[..8.min(user.id.len())], user.name);
            ctx.db.user().id().delete(&user.id);
        }
        ctx.db.session().connection_id().delete(&ctx.sender);
    }
}

/// Connection dropped - same cleanup as logout, plus session duration for the log
#[reducer(client_disconnected)]
pub fn on_disconnect(ctx: &ReducerContext) {
    if let Some(session) = ctx.db.session().connection_id().find(&ctx.sender) {
        let session_secs = ctx.timestamp.duration_since(session.connected_at)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if let Some(user) = ctx.db.user().id().find(&session.user_id) {
            log::info!("[SESSION] disconnect user:{} name:\"{}\" session_min:{:.1}",
                &user.id[..8.min(user.id.len())], user.name, session_secs as f32 / 60.0);
            ctx.db.user().id().delete(&user.id);
        }
        ctx.db.session().connection_id().delete(&ctx.sender);
    }
}

/// Record a claimed donation toward an event. Starts unconfirmed; an admin
/// flips is_paid once the external transfer is verified. Append-only.
#[reducer]
pub fn record_donation(
    ctx: &ReducerContext,
    event_id: u64,
    amount: f64,
    method: PaymentMethod,
    note: Option<String>,
) -> Result<(), String> {
    let user = get_user(ctx)?;

    if !(amount > 0.0) {
        return Err(LedgerError::Validation("donation amount must be greater than zero".to_string()).into());
    }
    if ctx.db.event().id().find(&event_id).is_none() {
        return Err(LedgerError::NotFound { entity: "event", id: event_id }.into());
    }

    ctx.db.donation().insert(Donation {
        id: 0, // auto_inc
        user_id: user.id.clone(),
        event_id,
        amount,
        method: method.clone(),
        note,
        is_paid: false,
        created_at: ctx.timestamp,
        user_name: Some(user.name.clone()),
    });

    log::info!("[DONATION] recorded user:{} event:{} amount:{:.2} method:{:?}",
        &user.id[..8.min(user.id.len())], event_id, amount, method);
    Ok(())
}

/// Confirm (or retract confirmation of) a claimed donation.
/// Admin only; idempotent.
#[reducer]
pub fn confirm_donation(ctx: &ReducerContext, donation_id: u64, paid: bool) -> Result<(), String> {
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        log::warn!("Unauthorized confirm_donation attempt by {}", ctx.sender);
        return Err("Unauthorized".to_string());
    }

    let mut donation = ctx.db.donation()
        .id()
        .find(&donation_id)
        .ok_or_else(|| String::from(LedgerError::NotFound { entity: "donation", id: donation_id }))?;

    if donation.is_paid == paid {
        return Ok(());
    }
    donation.is_paid = paid;
    let user_id = donation.user_id.clone();
    ctx.db.donation().id().update(donation);

    log::info!("[ADMIN] confirm_donation donation:{} user:{} paid:{}",
        donation_id, &user_id[..8.min(user_id.len())], paid);
    Ok(())
}

/// Submit a prediction for the active event. Enforces the registration
/// window and the confirmed entry-fee threshold, and rejects a second
/// guess for the same user. The new guess starts with the entry fee as
/// its donation total, unconfirmed.
#[reducer]
pub fn submit_guess(
    ctx: &ReducerContext,
    value: u64,
    method: PaymentMethod,
    note: Option<String>,
    charity_id: Option<String>,
) -> Result<(), String> {
    let user = get_user(ctx)?;
    let event = find_active_event(ctx)?;

    if let Some(cid) = &charity_id {
        if ctx.db.charity().id().find(cid).is_none() {
            return Err(LedgerError::Validation(format!("unknown charity \"{}\"", cid)).into());
        }
    }

    let donations = user_donations(ctx, &user.id);
    let check = can_guess(&user.id, &event, &donations, ctx.timestamp);
    if !check.allowed {
        let reason = check.reason.clone().unwrap_or_default();
        log::info!("[GUESS] denied user:{} event:{} reason:\"{}\" shortfall:{:.2}",
            &user.id[..8.min(user.id.len())], event.id, reason, check.shortfall);
        return Err(LedgerError::NotEligible { reason, shortfall: check.shortfall }.into());
    }

    let existing: Vec<Guess> = ctx.db.guess().user_id().filter(&user.id).collect();
    if has_guess(&user.id, event.id, &existing) {
        return Err(LedgerError::DuplicateGuess.into());
    }

    ctx.db.guess().insert(Guess {
        id: 0, // auto_inc
        event_id: event.id,
        user_id: user.id.clone(),
        value,
        total_donation: event.entry_fee,
        method,
        note,
        is_paid: false,
        charity_id,
        created_at: ctx.timestamp,
        user_name: Some(user.name.clone()),
        team: user.team.clone(),
    });

    log::info!("[GUESS] submitted user:{} event:{} value:{} entry_fee:{:.2}",
        &user.id[..8.min(user.id.len())], event.id, value, event.entry_fee);
    Ok(())
}

/// Pledge an extra donation on top of an existing entry. The leaderboard
/// only moves once the entry itself is confirmed paid.
#[reducer]
pub fn add_donation_to_guess(ctx: &ReducerContext, guess_id: u64, amount: f64) -> Result<(), String> {
    get_user(ctx)?;

    if !(amount > 0.0) {
        return Err(LedgerError::Validation("donation amount must be greater than zero".to_string()).into());
    }

    let mut guess = ctx.db.guess()
        .id()
        .find(&guess_id)
        .ok_or_else(|| String::from(LedgerError::NotFound { entity: "guess", id: guess_id }))?;

    guess.total_donation += amount;
    let event_id = guess.event_id;
    let is_paid = guess.is_paid;
    let new_total = guess.total_donation;
    ctx.db.guess().id().update(guess);

    if is_paid {
        refresh_donation_leaderboard(ctx, event_id);
    }

    log::info!("[DONATION] added guess:{} amount:{:.2} new_total:{:.2}",
        guess_id, amount, new_total);
    Ok(())
}

/// Confirm (or retract confirmation of) an entry payment.
/// Admin only; idempotent. Refreshes the donation leaderboard.
#[reducer]
pub fn mark_guess_paid(ctx: &ReducerContext, guess_id: u64, paid: bool) -> Result<(), String> {
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        log::warn!("Unauthorized mark_guess_paid attempt by {}", ctx.sender);
        return Err("Unauthorized".to_string());
    }

    let mut guess = ctx.db.guess()
        .id()
        .find(&guess_id)
        .ok_or_else(|| String::from(LedgerError::NotFound { entity: "guess", id: guess_id }))?;

    if guess.is_paid == paid {
        return Ok(());
    }
    guess.is_paid = paid;
    let event_id = guess.event_id;
    ctx.db.guess().id().update(guess);

    refresh_donation_leaderboard(ctx, event_id);

    log::info!("[ADMIN] mark_guess_paid guess:{} paid:{}", guess_id, paid);
    Ok(())
}

/// Unlock pro insights for the active event. Requires entry fee + pro fee
/// in confirmed donations; idempotent once granted.
#[reducer]
pub fn grant_pro(ctx: &ReducerContext) -> Result<(), String> {
    let user = get_user(ctx)?;
    let event = find_active_event(ctx)?;

    let donations = user_donations(ctx, &user.id);
    let check = can_access_pro(&user.id, &event, &donations, ctx.timestamp);
    if !check.allowed {
        let reason = check.reason.clone().unwrap_or_default();
        log::info!("[PRO] denied user:{} event:{} reason:\"{}\" shortfall:{:.2}",
            &user.id[..8.min(user.id.len())], event.id, reason, check.shortfall);
        return Err(LedgerError::NotEligible { reason, shortfall: check.shortfall }.into());
    }

    let already = ctx.db.pro_access()
        .user_id()
        .filter(&user.id)
        .any(|p| p.event_id == event.id);
    if already {
        return Ok(());
    }

    ctx.db.pro_access().insert(ProAccess {
        id: 0, // auto_inc
        event_id: event.id,
        user_id: user.id.clone(),
        granted_at: ctx.timestamp,
    });

    log::info!("[PRO] granted user:{} event:{}",
        &user.id[..8.min(user.id.len())], event.id);
    Ok(())
}

/// Create a new event, pending approval (is_active = false). Activation is
/// a separate admin decision.
#[reducer]
pub fn create_event(
    ctx: &ReducerContext,
    name: String,
    description: String,
    start: Timestamp,
    end: Timestamp,
    registration_opens_at: Timestamp,
    entry_fee: f64,
    pro_fee: f64,
    charity_ids: Vec<String>,
) -> Result<(), String> {
    let user = get_user(ctx)?;

    validate_event_fields(&name, start, end, registration_opens_at, entry_fee, pro_fee)
        .map_err(String::from)?;
    for cid in &charity_ids {
        if ctx.db.charity().id().find(cid).is_none() {
            return Err(LedgerError::Validation(format!("unknown charity \"{}\"", cid)).into());
        }
    }

    let event = ctx.db.event().insert(Event {
        id: 0, // auto_inc
        name: name.clone(),
        description,
        start,
        end,
        registration_opens_at,
        entry_fee,
        pro_fee,
        is_active: false,
        charity_ids,
        final_peak_orders: None,
        created_by: user.id.clone(),
        created_at: ctx.timestamp,
    });

    log::info!("[EVENT] created event:{} name:\"{}\" by:{} entry_fee:{:.2} pro_fee:{:.2} (pending approval)",
        event.id, name, &user.id[..8.min(user.id.len())], entry_fee, pro_fee);
    Ok(())
}

/// Approve or retire an event. Admin only. The first active event (lowest
/// id) stays the system's current event if several are active.
#[reducer]
pub fn set_event_active(ctx: &ReducerContext, event_id: u64, active: bool) -> Result<(), String> {
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        log::warn!("Unauthorized set_event_active attempt by {}", ctx.sender);
        return Err("Unauthorized".to_string());
    }

    let mut event = ctx.db.event()
        .id()
        .find(&event_id)
        .ok_or_else(|| String::from(LedgerError::NotFound { entity: "event", id: event_id }))?;

    if event.is_active == active {
        return Ok(());
    }
    if active {
        if let Some(current) = ctx.db.event().iter().filter(|e| e.is_active).min_by_key(|e| e.id) {
            log::warn!("[EVENT] activating event:{} while event:{} is active - lowest id stays current",
                event_id, current.id);
        }
    }
    event.is_active = active;
    ctx.db.event().id().update(event);

    log::info!("[ADMIN] set_event_active event:{} active:{}", event_id, active);
    Ok(())
}

/// Publish the true final peak-order number for an event and freeze the
/// closest-guess standings. Admin only. Write-once: re-publishing is
/// rejected, a closed contest is never re-scored.
#[reducer]
pub fn set_final_peak_orders(ctx: &ReducerContext, event_id: u64, value: u64) -> Result<(), String> {
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        log::warn!("Unauthorized set_final_peak_orders attempt by {}", ctx.sender);
        return Err("Unauthorized".to_string());
    }

    if value == 0 {
        return Err(LedgerError::Validation("final peak orders must be a positive integer".to_string()).into());
    }

    let mut event = ctx.db.event()
        .id()
        .find(&event_id)
        .ok_or_else(|| String::from(LedgerError::NotFound { entity: "event", id: event_id }))?;

    if let Some(published) = event.final_peak_orders {
        return Err(LedgerError::Validation(
            format!("final peak orders already published as {}", published),
        ).into());
    }

    event.final_peak_orders = Some(value);
    ctx.db.event().id().update(event);

    publish_closest_standings(ctx, event_id, value);

    log::info!("[ADMIN] final_peak_orders event:{} value:{}", event_id, value);
    Ok(())
}

/// Switch the donation leaderboard between team and individual grouping.
/// Admin only; rebuilds the materialized standings for every event.
#[reducer]
pub fn set_leaderboard_grouping(ctx: &ReducerContext, grouping: LeaderboardGrouping) -> Result<(), String> {
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        log::warn!("Unauthorized set_leaderboard_grouping attempt by {}", ctx.sender);
        return Err("Unauthorized".to_string());
    }

    if let Some(mut config) = ctx.db.leaderboard_config().iter().next() {
        if config.grouping == grouping {
            return Ok(());
        }
        config.grouping = grouping.clone();
        ctx.db.leaderboard_config().id().update(config);
    } else {
        ctx.db.leaderboard_config().insert(LeaderboardConfig { id: 0, grouping: grouping.clone() });
    }

    let event_ids: Vec<u64> = ctx.db.event().iter().map(|e| e.id).collect();
    for event_id in event_ids {
        refresh_donation_leaderboard(ctx, event_id);
    }

    log::info!("[ADMIN] leaderboard_grouping {:?}", grouping);
    Ok(())
}

/// Initialize module - enroll the owner as admin and seed the demo data
#[reducer(init)]
pub fn init(ctx: &ReducerContext) {
    // In init, ctx.sender is the module owner identity
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        ctx.db.authorized_worker().insert(AuthorizedWorker {
            identity: ctx.sender,
        });
    }

    if ctx.db.leaderboard_config().iter().count() == 0 {
        ctx.db.leaderboard_config().insert(LeaderboardConfig {
            id: 0,
            grouping: LeaderboardGrouping::ByTeam,
        });
    }

    if ctx.db.charity().iter().count() == 0 {
        for charity in catalog::seed_charities() {
            ctx.db.charity().insert(charity);
        }
    }

    if ctx.db.historical_peak().iter().count() == 0 {
        for point in catalog::seed_history() {
            ctx.db.historical_peak().insert(point);
        }
    }

    // Demo event: live now, registration opens in an hour, runs a week
    if ctx.db.event().iter().count() == 0 {
        let charity_ids: Vec<String> = ctx.db.charity().iter().map(|c| c.id).collect();
        ctx.db.event().insert(Event {
            id: 0, // auto_inc
            name: "Peak Orders – Holiday".to_string(),
            description: "Guess the highest number of internet orders we'll hit in a single day \
                during the holiday event. Entry is $10, supports charity, and you can donate \
                more to climb the leaderboard!".to_string(),
            start: ctx.timestamp,
            end: ctx.timestamp + std::time::Duration::from_secs(SEED_EVENT_DURATION_SECS),
            registration_opens_at: ctx.timestamp
                + std::time::Duration::from_secs(SEED_REGISTRATION_DELAY_SECS),
            entry_fee: SEED_ENTRY_FEE,
            pro_fee: SEED_PRO_FEE,
            is_active: true,
            charity_ids,
            final_peak_orders: None,
            created_by: format!("{}", ctx.identity()),
            created_at: ctx.timestamp,
        });
    }

    log::info!("Peak Pledge module initialized successfully");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(micros: i64) -> Timestamp {
        Timestamp::from_micros_since_unix_epoch(micros)
    }

    fn test_event(entry_fee: f64, pro_fee: f64, reg_opens_micros: i64) -> Event {
        Event {
            id: 1,
            name: "Peak Orders – Test".to_string(),
            description: String::new(),
            start: ts(0),
            end: ts(100_000_000),
            registration_opens_at: ts(reg_opens_micros),
            entry_fee,
            pro_fee,
            is_active: true,
            charity_ids: vec!["c1".to_string()],
            final_peak_orders: None,
            created_by: "leader-1".to_string(),
            created_at: ts(0),
        }
    }

    fn test_donation(user_id: &str, event_id: u64, amount: f64, is_paid: bool) -> Donation {
        Donation {
            id: 0,
            user_id: user_id.to_string(),
            event_id,
            amount,
            method: PaymentMethod::Zelle,
            note: None,
            is_paid,
            created_at: ts(0),
            user_name: None,
        }
    }

    fn test_guess(
        id: u64,
        value: u64,
        total_donation: f64,
        created_micros: i64,
        team: Option<&str>,
        is_paid: bool,
    ) -> Guess {
        Guess {
            id,
            event_id: 1,
            user_id: format!("u{}", id),
            value,
            total_donation,
            method: PaymentMethod::Venmo,
            note: None,
            is_paid,
            charity_id: None,
            created_at: ts(created_micros),
            user_name: Some(format!("User {}", id)),
            team: team.map(|t| t.to_string()),
        }
    }

    #[test]
    fn test_confirmed_total_excludes_unpaid() {
        let donations = vec![
            test_donation("u1", 1, 10.0, true),
            test_donation("u1", 1, 25.0, false), // claimed, never verified
            test_donation("u1", 2, 50.0, true),  // different event
            test_donation("u2", 1, 99.0, true),  // different user
        ];
        assert_eq!(confirmed_donation_total("u1", 1, &donations), 10.0);
        assert_eq!(claimed_donation_total("u1", 1, &donations), 35.0);
    }

    #[test]
    fn test_registration_boundary_inclusive() {
        let event = test_event(10.0, 30.0, 5_000);
        assert!(!is_registration_open(&event, ts(4_999)));
        assert!(is_registration_open(&event, ts(5_000)));
        assert!(is_registration_open(&event, ts(5_001)));
    }

    #[test]
    fn test_event_live_window() {
        let event = test_event(10.0, 30.0, 0);
        assert!(is_event_live(&event, ts(0)));
        assert!(is_event_live(&event, ts(50_000_000)));
        assert!(is_event_live(&event, ts(100_000_000)));
        assert!(!is_event_live(&event, ts(100_000_001)));
        assert!(!is_event_live(&event, ts(-1)));
    }

    #[test]
    fn test_can_guess_denied_before_registration() {
        let event = test_event(10.0, 30.0, 5_000);
        let donations = vec![test_donation("u1", 1, 100.0, true)];
        let check = can_guess("u1", &event, &donations, ts(1_000));
        assert!(!check.allowed);
        assert_eq!(check.shortfall, 0.0); // not a money problem
        assert!(check.reason.unwrap().contains("not yet opened"));
    }

    #[test]
    fn test_can_guess_shortfall_with_no_donations() {
        // entry fee 10, nothing confirmed: denied, shortfall is the full fee
        let event = test_event(10.0, 30.0, 0);
        let check = can_guess("u1", &event, &[], ts(1_000));
        assert!(!check.allowed);
        assert_eq!(check.shortfall, 10.0);
        assert!(check.reason.unwrap().contains("$10.00"));
    }

    #[test]
    fn test_can_guess_ignores_unconfirmed_claims() {
        let event = test_event(10.0, 30.0, 0);
        let donations = vec![test_donation("u1", 1, 500.0, false)];
        let check = can_guess("u1", &event, &donations, ts(1_000));
        assert!(!check.allowed);
        assert_eq!(check.shortfall, 10.0);
    }

    #[test]
    fn test_can_guess_allowed_at_exact_entry_fee() {
        let event = test_event(10.0, 30.0, 0);
        let donations = vec![test_donation("u1", 1, 10.0, true)];
        let check = can_guess("u1", &event, &donations, ts(1_000));
        assert!(check.allowed);
        assert_eq!(check.reason, None);
        assert_eq!(check.shortfall, 0.0);
    }

    #[test]
    fn test_can_guess_never_revoked_by_more_donations() {
        // Monotonic: once allowed, piling on confirmed donations never flips it back
        let event = test_event(10.0, 30.0, 0);
        let mut donations = Vec::new();
        let mut was_allowed = false;
        for _ in 0..25 {
            donations.push(test_donation("u1", 1, 1.0, true));
            let check = can_guess("u1", &event, &donations, ts(1_000));
            if was_allowed {
                assert!(check.allowed, "allowed flipped back to denied at {} donations", donations.len());
            }
            if check.allowed {
                was_allowed = true;
            }
        }
        assert!(was_allowed);
    }

    #[test]
    fn test_pro_shortfall_beyond_entry() {
        // entry 10, pro 30, confirmed 10: can guess, but pro needs 30 more
        let event = test_event(10.0, 30.0, 0);
        let donations = vec![test_donation("u1", 1, 10.0, true)];
        assert!(can_guess("u1", &event, &donations, ts(1_000)).allowed);
        let check = can_access_pro("u1", &event, &donations, ts(1_000));
        assert!(!check.allowed);
        assert_eq!(check.shortfall, 30.0);
        assert!(check.reason.unwrap().contains("$40.00"));
    }

    #[test]
    fn test_pro_propagates_guess_denial() {
        let event = test_event(10.0, 30.0, 5_000);
        let denied = can_access_pro("u1", &event, &[], ts(1_000));
        assert!(!denied.allowed);
        assert!(denied.reason.unwrap().contains("not yet opened"));

        let allowed = can_access_pro("u1", &event, &[test_donation("u1", 1, 40.0, true)], ts(5_000));
        assert!(allowed.allowed);
    }

    #[test]
    fn test_closest_distance_tie_goes_to_bigger_donor() {
        // Both 2000 away from 62000; the $50 donor beats the earlier $10 entry
        let a = test_guess(1, 60_000, 10.0, 100, None, true);
        let b = test_guess(2, 64_000, 50.0, 200, None, true);
        let standings = closest_standings(vec![a, b], 62_000);
        assert_eq!(standings[0].id, 2);
        assert_eq!(standings[1].id, 1);
    }

    #[test]
    fn test_closest_full_tie_goes_to_earlier_entry() {
        let a = test_guess(1, 60_000, 25.0, 100, None, true);
        let b = test_guess(2, 64_000, 25.0, 200, None, true);
        let standings = closest_standings(vec![b, a], 62_000);
        assert_eq!(standings[0].id, 1);
    }

    #[test]
    fn test_closest_distance_dominates() {
        let near = test_guess(1, 61_500, 1.0, 900, None, true);
        let far = test_guess(2, 59_000, 999.0, 100, None, true);
        let standings = closest_standings(vec![far, near], 62_000);
        assert_eq!(standings[0].id, 1);
    }

    #[test]
    fn test_closest_comparator_is_a_total_order() {
        let target = 62_000;
        let guesses = vec![
            test_guess(1, 60_000, 10.0, 100, None, true),
            test_guess(2, 64_000, 50.0, 200, None, true),
            test_guess(3, 61_000, 10.0, 300, None, true),
            test_guess(4, 63_000, 10.0, 50, None, true),
            test_guess(5, 62_000, 5.0, 400, None, true),
        ];

        for a in &guesses {
            for b in &guesses {
                let ab = closest_guess_order(a, b, target);
                let ba = closest_guess_order(b, a, target);
                if a.id == b.id {
                    assert_eq!(ab, Ordering::Equal);
                } else {
                    assert_ne!(ab, Ordering::Equal, "guesses {} and {} not ordered", a.id, b.id);
                    assert_eq!(ab, ba.reverse());
                }
            }
        }

        // Sorting any input order yields the same standings
        let sorted: Vec<u64> = closest_standings(guesses.clone(), target).iter().map(|g| g.id).collect();
        let mut reversed = guesses;
        reversed.reverse();
        let sorted_rev: Vec<u64> = closest_standings(reversed, target).iter().map(|g| g.id).collect();
        assert_eq!(sorted, sorted_rev);
        assert_eq!(sorted[0], 5); // exact hit wins
    }

    #[test]
    fn test_donation_standings_by_team() {
        let guesses = vec![
            test_guess(1, 60_000, 10.0, 100, Some("Phoenix"), true),
            test_guess(2, 61_000, 40.0, 200, Some("Executive"), true),
            test_guess(3, 62_000, 15.0, 300, Some("Phoenix"), true),
            test_guess(4, 63_000, 500.0, 400, Some("Phoenix"), false), // unconfirmed
            test_guess(5, 64_000, 5.0, 500, None, true),
        ];
        let standings = donation_standings(&guesses, &LeaderboardGrouping::ByTeam);
        assert_eq!(standings.len(), 3);
        assert_eq!(standings[0], ("Executive".to_string(), 40.0));
        assert_eq!(standings[1], ("Phoenix".to_string(), 25.0));
        assert_eq!(standings[2], (UNASSIGNED_TEAM.to_string(), 5.0));
    }

    #[test]
    fn test_donation_standings_by_user() {
        let guesses = vec![
            test_guess(1, 60_000, 10.0, 100, Some("Phoenix"), true),
            test_guess(2, 61_000, 40.0, 200, Some("Phoenix"), true),
        ];
        let standings = donation_standings(&guesses, &LeaderboardGrouping::ByUser);
        assert_eq!(standings.len(), 2);
        assert_eq!(standings[0], ("User 2".to_string(), 40.0));
        assert_eq!(standings[1], ("User 1".to_string(), 10.0));
    }

    #[test]
    fn test_donation_standings_ties_keep_first_seen_order() {
        let guesses = vec![
            test_guess(1, 60_000, 20.0, 100, Some("Bravo"), true),
            test_guess(2, 61_000, 20.0, 200, Some("Alpha"), true),
        ];
        let standings = donation_standings(&guesses, &LeaderboardGrouping::ByTeam);
        assert_eq!(standings[0].0, "Bravo"); // submitted first, keeps the tie
        assert_eq!(standings[1].0, "Alpha");
    }

    #[test]
    fn test_has_guess_one_per_user_per_event() {
        let guesses = vec![test_guess(1, 60_000, 10.0, 100, None, false)];
        assert!(has_guess("u1", 1, &guesses));
        assert!(!has_guess("u1", 2, &guesses));
        assert!(!has_guess("u9", 1, &guesses));
    }

    #[test]
    fn test_validate_event_fields() {
        assert!(validate_event_fields("Q4 Challenge", ts(100), ts(200), ts(50), 10.0, 0.0).is_ok());

        assert!(matches!(
            validate_event_fields("  ", ts(100), ts(200), ts(50), 10.0, 0.0),
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            validate_event_fields("X", ts(200), ts(200), ts(50), 10.0, 0.0),
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            validate_event_fields("X", ts(100), ts(200), ts(100), 10.0, 0.0),
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            validate_event_fields("X", ts(100), ts(200), ts(50), 0.0, 0.0),
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            validate_event_fields("X", ts(100), ts(200), ts(50), 10.0, -5.0),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn test_history_stats_and_suggested_range() {
        let points = catalog::seed_history();
        let stats = history_stats(&points).unwrap();
        assert!((stats.average - 163_000.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.min, 48_000);
        assert_eq!(stats.max, 62_000);

        // Range grows off the latest year (62k): 1.05x and 1.25x
        let (low, high) = suggested_range(&points).unwrap();
        assert_eq!(low, 65_100);
        assert_eq!(high, 77_500);

        assert!(history_stats(&[]).is_none());
        assert!(suggested_range(&[]).is_none());
    }

    #[test]
    fn test_error_messages() {
        let err = LedgerError::NotEligible {
            reason: "You must donate at least $10.00 to participate".to_string(),
            shortfall: 10.0,
        };
        assert_eq!(
            err.to_string(),
            "You must donate at least $10.00 to participate ($10.00 more needed)"
        );

        let err = LedgerError::NotFound { entity: "event", id: 7 };
        assert_eq!(err.to_string(), "event 7 not found");

        assert!(LedgerError::DuplicateGuess.to_string().contains("already submitted"));
    }
}
