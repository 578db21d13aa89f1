// Static catalog data seeded at module init.
// Charities are reference data - users read them, nothing mutates them.

use crate::{Charity, HistoricalPeak};

/// Charity catalog shipped with the demo fundraiser
pub fn seed_charities() -> Vec<Charity> {
    vec![
        Charity {
            id: "c1".to_string(),
            name: "Code for Good".to_string(),
            description: "Supporting STEM education for underserved communities.".to_string(),
            url: "https://example.org/code-for-good".to_string(),
            category: "Education".to_string(),
        },
        Charity {
            id: "c2".to_string(),
            name: "Health First".to_string(),
            description: "Improving access to basic healthcare globally.".to_string(),
            url: "https://example.org/health-first".to_string(),
            category: "Health".to_string(),
        },
    ]
}

/// Historical peak-order series backing the pro insights (demo data)
pub fn seed_history() -> Vec<HistoricalPeak> {
    vec![
        HistoricalPeak { year: 2022, peak_orders: 48_000 },
        HistoricalPeak { year: 2023, peak_orders: 53_000 },
        HistoricalPeak { year: 2024, peak_orders: 62_000 },
    ]
}
