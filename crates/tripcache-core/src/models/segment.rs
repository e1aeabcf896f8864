use serde::{Deserialize, Serialize};

use super::SizeOf;

/// A port or station. All fields are opaque display strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub code: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginDestination {
    pub origin: Location,
    #[serde(rename = "originCity")]
    pub origin_city: String,
    pub destination: Location,
    #[serde(rename = "destinationCity")]
    pub destination_city: String,
}

/// One leg of a booking. `id` is only unique within its booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub id: i64,
    #[serde(rename = "originAndDestinationPair")]
    pub pair: OriginDestination,
}

impl Segment {
    /// "BBB (Origin City) -> AAA (Destination City)"
    pub fn route_display(&self) -> String {
        format!(
            "{} ({}) -> {} ({})",
            self.pair.origin.code,
            self.pair.origin_city,
            self.pair.destination.code,
            self.pair.destination_city
        )
    }
}

impl SizeOf for Location {
    fn size_of(&self) -> usize {
        std::mem::size_of::<Self>() + self.code.len() + self.display_name.len() + self.url.len()
    }
}

impl SizeOf for OriginDestination {
    fn size_of(&self) -> usize {
        // Locations are inline; count only their heap parts on top of our own size.
        std::mem::size_of::<Self>() - 2 * std::mem::size_of::<Location>()
            + self.origin.size_of()
            + self.destination.size_of()
            + self.origin_city.len()
            + self.destination_city.len()
    }
}

impl SizeOf for Segment {
    fn size_of(&self) -> usize {
        std::mem::size_of::<i64>() + self.pair.size_of()
    }
}
