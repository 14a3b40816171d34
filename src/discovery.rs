//! Service advertisement refresh
//!
//! Re-registers the client with the discovery service on a fixed cadence
//! while not streaming, carrying the capability flags the sender keys its
//! encoder setup on.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::config::Capabilities;
use log::{debug, error};
use std::io;
use std::time::{Duration, Instant};

/// Re-registration cadence while not streaming.
const REFRESH_INTERVAL: Duration = Duration::from_secs(2);

/// Discovery/advertisement collaborator.
pub trait ServiceAdvertiser: Send {
    fn register(&mut self, properties: &[(&'static str, String)]) -> io::Result<()>;
}

pub struct DiscoveryRefresher {
    capabilities: Capabilities,
    last_refresh: Option<Instant>,
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

impl DiscoveryRefresher {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            last_refresh: None,
        }
    }

    pub fn set_capabilities(&mut self, capabilities: Capabilities) {
        self.capabilities = capabilities;
    }

    /// Refreshes the advertisement if due. Suppressed entirely while
    /// streaming; the sender already knows us then.
    pub fn tick(
        &mut self,
        advertiser: &mut dyn ServiceAdvertiser,
        now: Instant,
        streaming: bool,
    ) {
        if streaming {
            return;
        }
        if let Some(last) = self.last_refresh {
            if now.duration_since(last) < REFRESH_INTERVAL {
                return;
            }
        }
        self.last_refresh = Some(now);

        let caps = &self.capabilities;
        let properties = [
            ("cloud_optimized", flag(caps.cloud_optimized)),
            ("hevc_enabled", flag(caps.hevc)),
            ("10bit_enabled", flag(caps.ten_bit)),
            ("rtx_optimized", flag(caps.rtx_optimized)),
            ("foveated_rendering", flag(caps.foveated_rendering)),
            ("wifi_optimized", flag(caps.wifi_optimized)),
        ];
        debug!("refreshing service advertisement");
        if let Err(e) = advertiser.register(&properties) {
            error!("Service registration failed ({e}). Will try again on the next cycle.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;

    #[derive(Default)]
    struct RecordingAdvertiser {
        registrations: Vec<Vec<(&'static str, String)>>,
    }

    impl ServiceAdvertiser for RecordingAdvertiser {
        fn register(&mut self, properties: &[(&'static str, String)]) -> io::Result<()> {
            self.registrations.push(properties.to_vec());
            Ok(())
        }
    }

    #[test]
    fn flags_carry_string_booleans() {
        let mut config = StreamConfig::default();
        config.prefer_hevc = true;
        let mut refresher = DiscoveryRefresher::new(Capabilities::resolve(&config));
        let mut advertiser = RecordingAdvertiser::default();

        refresher.tick(&mut advertiser, Instant::now(), false);
        let properties = &advertiser.registrations[0];
        assert!(properties.contains(&("hevc_enabled", "1".to_string())));
        assert!(properties.contains(&("10bit_enabled", "0".to_string())));
        assert!(properties.contains(&("foveated_rendering", "1".to_string())));
    }

    #[test]
    fn refresh_is_rate_limited_and_suppressed_while_streaming() {
        let config = StreamConfig::default();
        let mut refresher = DiscoveryRefresher::new(Capabilities::resolve(&config));
        let mut advertiser = RecordingAdvertiser::default();
        let start = Instant::now();

        refresher.tick(&mut advertiser, start, false);
        refresher.tick(&mut advertiser, start + Duration::from_millis(500), false);
        assert_eq!(advertiser.registrations.len(), 1);

        refresher.tick(&mut advertiser, start + Duration::from_secs(3), true);
        assert_eq!(advertiser.registrations.len(), 1);

        refresher.tick(&mut advertiser, start + Duration::from_secs(5), false);
        assert_eq!(advertiser.registrations.len(), 2);
    }
}
