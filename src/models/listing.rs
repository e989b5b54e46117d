use serde::{Deserialize, Serialize};

pub const NO_TITLE: &str = "Sin título";
pub const NO_PRICE: &str = "Precio no disponible";
pub const NO_YEAR: &str = "Año no disponible";
pub const NO_MILEAGE: &str = "KM no disponible";
pub const NO_LOCATION: &str = "Ubicación no disponible";

/// Title used when the listing page could not be fetched at all.
pub const LOAD_FAILED_TITLE: &str = "Error al cargar";
pub const NOT_AVAILABLE: &str = "N/A";

/// Structured view of a single listing page. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListingDetail {
    pub title: String,
    /// Currency-qualified, e.g. `US$ 15.500`.
    pub price: String,
    pub year: String,
    pub mileage: String,
    pub location: String,
    pub url: String,
}

impl ListingDetail {
    /// Record for a page whose structure matched nothing.
    pub fn placeholder(url: &str) -> Self {
        Self {
            title: NO_TITLE.to_string(),
            price: NO_PRICE.to_string(),
            year: NO_YEAR.to_string(),
            mileage: NO_MILEAGE.to_string(),
            location: NO_LOCATION.to_string(),
            url: url.to_string(),
        }
    }

    /// Record for a page that could not be fetched.
    pub fn unavailable(url: &str) -> Self {
        Self {
            title: LOAD_FAILED_TITLE.to_string(),
            price: NOT_AVAILABLE.to_string(),
            year: NOT_AVAILABLE.to_string(),
            mileage: NOT_AVAILABLE.to_string(),
            location: NOT_AVAILABLE.to_string(),
            url: url.to_string(),
        }
    }

    pub fn render_message(&self) -> String {
        format!(
            "🚗 {}\n💰 {}\n📅 {} | {}km\n📍 {}\n🔗 {}",
            self.title, self.price, self.year, self.mileage, self.location, self.url
        )
    }
}
