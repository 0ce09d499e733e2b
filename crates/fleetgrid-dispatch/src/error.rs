//! Command dispatch error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("outbox store error: {0}")]
    State(#[from] fleetgrid_state::StateError),

    #[error(transparent)]
    Bus(#[from] fleetgrid_bus::BusError),
}

pub type DispatchResult<T> = Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgrid_bus::BusError;

    #[test]
    fn bus_errors_are_not_prefixed_twice() {
        let err = DispatchError::from(BusError::Transport("down".to_string()));
        assert_eq!(err.to_string(), "transport error: down");
    }
}
