use std::convert::TryFrom;
use tokio::time::Duration;

/// Timing knobs. Every field has a sane default; deployments usually only
/// touch these in tests or unusual networks.
#[derive(Clone, Default)]
pub struct RaftOptions {
    pub leader_heartbeat_duration: Option<Duration>,
    pub follower_min_timeout: Option<Duration>,
    pub follower_max_timeout: Option<Duration>,
}

pub(crate) struct RaftOptionsValidated {
    pub leader_heartbeat_duration: Duration,
    pub follower_min_timeout: Duration,
    pub follower_max_timeout: Duration,
}

impl RaftOptionsValidated {
    /// A heartbeat interval at or above the election timeout floor would
    /// make healthy followers start elections, so it is a configuration
    /// error, not a tuning choice.
    fn validate(&self) -> Result<(), &'static str> {
        if self.leader_heartbeat_duration >= self.follower_min_timeout {
            return Err("Follower minimum timeout must be greater than leader's heartbeat");
        }
        if self.follower_min_timeout >= self.follower_max_timeout {
            return Err("Follower minimum timeout must be less than maximum timeout");
        }

        Ok(())
    }
}

impl TryFrom<RaftOptions> for RaftOptionsValidated {
    type Error = &'static str;

    fn try_from(options: RaftOptions) -> Result<Self, Self::Error> {
        let values = RaftOptionsValidated {
            leader_heartbeat_duration: options
                .leader_heartbeat_duration
                .unwrap_or(Duration::from_millis(100)),
            follower_min_timeout: options
                .follower_min_timeout
                .unwrap_or(Duration::from_millis(500)),
            follower_max_timeout: options
                .follower_max_timeout
                .unwrap_or(Duration::from_millis(1500)),
        };

        values.validate()?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(RaftOptionsValidated::try_from(RaftOptions::default()).is_ok());
    }

    #[test]
    fn heartbeat_slower_than_election_floor_is_rejected() {
        let options = RaftOptions {
            leader_heartbeat_duration: Some(Duration::from_millis(1000)),
            follower_min_timeout: Some(Duration::from_millis(100)),
            follower_max_timeout: Some(Duration::from_millis(200)),
        };
        assert!(RaftOptionsValidated::try_from(options).is_err());
    }

    #[test]
    fn inverted_election_window_is_rejected() {
        let options = RaftOptions {
            follower_min_timeout: Some(Duration::from_millis(900)),
            follower_max_timeout: Some(Duration::from_millis(800)),
            ..Default::default()
        };
        assert!(RaftOptionsValidated::try_from(options).is_err());
    }
}
