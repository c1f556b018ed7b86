use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CastMember {
    pub name: String,
    pub character: Option<String>,
    #[serde(rename = "profilePath")]
    pub profile_path: Option<String>,
}

/// A video attached to a movie upstream; candidates for the stored trailer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoCandidate {
    pub key: String,
    pub site: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub official: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Movie {
    pub id: i64,
    pub title: String,
    pub overview: String,
    #[serde(rename = "posterPath")]
    pub poster_path: Option<String>,
    #[serde(rename = "backdropPath")]
    pub backdrop_path: Option<String>,
    pub genres: Vec<Genre>,
    pub casts: Vec<CastMember>,
    #[serde(rename = "releaseDate")]
    pub release_date: Option<String>,
    #[serde(rename = "originalLanguage")]
    pub original_language: Option<String>,
    pub tagline: String,
    #[serde(rename = "voteAverage")]
    pub vote_average: f64,
    #[serde(rename = "voteCount")]
    pub vote_count: u64,
    pub runtime: Option<u32>,
    pub trailer: Option<String>,
}

/// Amount in minor currency units (cents).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Converts a major-unit amount such as `12.5` into cents. Rejects
    /// non-finite and non-positive values.
    pub fn from_major(amount: f64) -> Option<Self> {
        if !amount.is_finite() || amount <= 0.0 {
            return None;
        }
        let cents = (amount * 100.0).round();
        if cents < 1.0 || cents > u64::MAX as f64 {
            return None;
        }
        Some(Self::from_cents(cents as u64))
    }

    pub const fn cents(self) -> u64 {
        self.0
    }

    pub fn times(self, quantity: usize) -> Self {
        Self(self.0.saturating_mul(quantity as u64))
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::default(), |acc, m| acc + m)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Seat identifier: one row letter followed by a column number, e.g. `C4`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SeatId(String);

impl SeatId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SeatId {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_uppercase();
        let mut chars = normalized.chars();
        let valid_row = chars.next().is_some_and(|c| c.is_ascii_uppercase());
        let column = chars.as_str();
        let valid_column = !column.is_empty()
            && column.chars().all(|c| c.is_ascii_digit())
            && !column.starts_with('0');
        if valid_row && valid_column {
            Ok(Self(normalized))
        } else {
            Err(format!("invalid seat identifier: {raw:?}"))
        }
    }
}

impl TryFrom<String> for SeatId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SeatId> for String {
    fn from(seat: SeatId) -> Self {
        seat.0
    }
}

impl fmt::Display for SeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Show {
    pub id: Uuid,
    #[serde(rename = "movieId")]
    pub movie_id: i64,
    #[serde(rename = "startsAt")]
    pub starts_at: DateTime<Utc>,
    pub price: Money,
    /// Seat -> booking currently holding it.
    #[serde(rename = "occupiedSeats")]
    pub occupied_seats: BTreeMap<SeatId, Uuid>,
}

impl Show {
    pub fn new(movie_id: i64, starts_at: DateTime<Utc>, price: Money) -> Self {
        Self {
            id: Uuid::new_v4(),
            movie_id,
            starts_at,
            price,
            occupied_seats: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Paid,
    Expired,
    Cancelled,
}

impl BookingStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, BookingStatus::Pending)
    }

    /// Whether a booking in this state keeps its seats.
    pub fn holds_seats(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Paid)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Paid => "PAID",
            BookingStatus::Expired => "EXPIRED",
            BookingStatus::Cancelled => "CANCELLED",
        };
        f.write_str(label)
    }
}

/// Customer details captured when the booking is made.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerSnapshot {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "showId")]
    pub show_id: Uuid,
    pub seats: Vec<SeatId>,
    pub amount: Money,
    pub status: BookingStatus,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "paymentReference")]
    pub payment_reference: Option<String>,
    #[serde(rename = "paymentLink")]
    pub payment_link: Option<String>,
    #[serde(rename = "paidAt")]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(rename = "reminderSentAt")]
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub customer: CustomerSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscriber {
    pub name: String,
    pub email: String,
}

impl From<CustomerSnapshot> for Subscriber {
    fn from(customer: CustomerSnapshot) -> Self {
        Self {
            name: customer.name,
            email: customer.email,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seat_ids_are_normalized_and_validated() {
        assert_eq!("c4".parse::<SeatId>().unwrap().as_str(), "C4");
        assert_eq!(" J12 ".parse::<SeatId>().unwrap().as_str(), "J12");
        assert!("4C".parse::<SeatId>().is_err());
        assert!("C".parse::<SeatId>().is_err());
        assert!("C0".parse::<SeatId>().is_err());
        assert!("CC4".parse::<SeatId>().is_err());
    }

    #[test]
    fn money_converts_from_major_units() {
        assert_eq!(Money::from_major(10.0), Some(Money::from_cents(1000)));
        assert_eq!(Money::from_major(12.345), Some(Money::from_cents(1235)));
        assert_eq!(Money::from_major(0.0), None);
        assert_eq!(Money::from_major(-3.0), None);
        assert_eq!(Money::from_major(f64::NAN), None);
        assert_eq!(Money::from_cents(1050).to_string(), "$10.50");
        assert_eq!(Money::from_cents(1000).times(3), Money::from_cents(3000));
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!BookingStatus::Pending.is_terminal());
        assert!(BookingStatus::Paid.is_terminal());
        assert!(BookingStatus::Paid.holds_seats());
        assert!(!BookingStatus::Expired.holds_seats());
        assert!(!BookingStatus::Cancelled.holds_seats());
    }
}
