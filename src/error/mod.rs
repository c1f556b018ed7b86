use crate::models::{BookingStatus, SeatId};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("seats already taken: {}", join_seats(.seats))]
    SeatConflict { seats: Vec<SeatId> },

    #[error("show {0} not found")]
    ShowNotFound(Uuid),

    #[error("show {0} has already started")]
    ShowInPast(Uuid),

    #[error("movie {0} not found")]
    MovieNotFound(i64),

    #[error("booking {0} not found")]
    BookingNotFound(Uuid),

    #[error("booking {booking_id} is already {status}")]
    AlreadyTerminal {
        booking_id: Uuid,
        status: BookingStatus,
    },

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn upstream(err: anyhow::Error) -> Self {
        Error::UpstreamUnavailable(format!("{err:#}"))
    }
}

fn join_seats(seats: &[SeatId]) -> String {
    seats
        .iter()
        .map(SeatId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
