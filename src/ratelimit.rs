//! Per-area request rate limiting.
//!
//! Every endpoint belongs to an [`Area`]; each area has its own token bucket
//! per client address.

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use governor::clock::DefaultClock;
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter};
use tracing::{debug, info};

use crate::config;
use crate::error::AppError;

type KeyedLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Area {
    Read,
    Create,
    Delete,
}

impl Area {
    pub fn as_str(&self) -> &'static str {
        match self {
            Area::Read => "read",
            Area::Create => "create",
            Area::Delete => "delete",
        }
    }
}

/// Rate limiter shared across requests. Disabled limiters allow everything.
#[derive(Clone)]
pub struct Ratelimiter {
    inner: Option<Arc<Limiters>>,
}

struct Limiters {
    read: KeyedLimiter,
    create: KeyedLimiter,
    delete: KeyedLimiter,
}

impl Ratelimiter {
    pub fn new(config: &config::Ratelimit) -> Self {
        if !config.enabled {
            return Self::disabled();
        }

        Ratelimiter {
            inner: Some(Arc::new(Limiters {
                read: RateLimiter::dashmap(quota(&config.read)),
                create: RateLimiter::dashmap(quota(&config.create)),
                delete: RateLimiter::dashmap(quota(&config.delete)),
            })),
        }
    }

    pub fn disabled() -> Self {
        Ratelimiter { inner: None }
    }

    /// Take one request for `client` out of the bucket for `area`.
    pub fn check(&self, area: Area, client: &ClientAddr) -> crate::AppResult<()> {
        let Some(limiters) = &self.inner else {
            return Ok(());
        };

        let limiter = match area {
            Area::Read => &limiters.read,
            Area::Create => &limiters.create,
            Area::Delete => &limiters.delete,
        };

        limiter.check_key(&client.0).map_err(|_| {
            debug!("rate limited: client={}, area={}", client.0, area.as_str());
            AppError::Ratelimit
        })
    }

    /// Forget clients whose buckets have refilled, returning how many were
    /// dropped.
    pub fn cleanup(&self) -> usize {
        let Some(limiters) = &self.inner else {
            return 0;
        };

        [&limiters.read, &limiters.create, &limiters.delete]
            .into_iter()
            .map(|limiter| {
                let before = limiter.len();
                limiter.retain_recent();
                limiter.shrink_to_fit();
                before.saturating_sub(limiter.len())
            })
            .sum()
    }
}

/// Run [`Ratelimiter::cleanup`] every `interval`.
pub fn spawn_cleanup_task(
    limiter: Ratelimiter,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let evicted = limiter.cleanup();
            if evicted > 0 {
                info!("rate limiter dropped {evicted} idle clients");
            }
        }
    })
}

fn quota(limit: &config::AreaLimit) -> Quota {
    Quota::per_minute(NonZeroU32::new(limit.per_minute).unwrap_or(NonZeroU32::MIN))
        .allow_burst(NonZeroU32::new(limit.burst).unwrap_or(NonZeroU32::MIN))
}

/// The address a request came from, used as the rate limiting key.
///
/// Requests served without connection info (tests, unix sockets) share one
/// bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddr(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for ClientAddr
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_owned());
        Ok(ClientAddr(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(burst: u32) -> config::Ratelimit {
        let limit = config::AreaLimit {
            per_minute: 1,
            burst,
        };
        config::Ratelimit {
            enabled: true,
            cleanup_interval_secs: 60,
            read: limit,
            create: limit,
            delete: limit,
        }
    }

    #[test]
    fn denies_after_burst() {
        let limiter = Ratelimiter::new(&limits(2));
        let client = ClientAddr("192.0.2.1".to_owned());

        assert!(limiter.check(Area::Create, &client).is_ok());
        assert!(limiter.check(Area::Create, &client).is_ok());
        assert!(matches!(
            limiter.check(Area::Create, &client),
            Err(AppError::Ratelimit)
        ));
    }

    #[test]
    fn areas_and_clients_are_separate() {
        let limiter = Ratelimiter::new(&limits(1));
        let client = ClientAddr("192.0.2.1".to_owned());
        let other = ClientAddr("192.0.2.2".to_owned());

        assert!(limiter.check(Area::Create, &client).is_ok());
        assert!(limiter.check(Area::Create, &client).is_err());
        assert!(limiter.check(Area::Read, &client).is_ok());
        assert!(limiter.check(Area::Create, &other).is_ok());
    }

    #[test]
    fn cleanup_forgets_refilled_clients_only() {
        let fast = config::AreaLimit {
            per_minute: 60_000,
            burst: 1,
        };
        let slow = config::AreaLimit {
            per_minute: 1,
            burst: 2,
        };
        let limiter = Ratelimiter::new(&config::Ratelimit {
            enabled: true,
            cleanup_interval_secs: 60,
            read: fast,
            create: slow,
            delete: slow,
        });

        for index in 0..10 {
            let client = ClientAddr(format!("192.0.2.{index}"));
            limiter.check(Area::Read, &client).unwrap();
        }
        let idle = ClientAddr("198.51.100.1".to_owned());
        limiter.check(Area::Create, &idle).unwrap();

        // a read token refills after a millisecond, a create token after a minute
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(limiter.cleanup(), 10);
        assert_eq!(limiter.cleanup(), 0);

        // the create bucket was kept, so its burst is still partly spent
        limiter.check(Area::Create, &idle).unwrap();
        assert!(limiter.check(Area::Create, &idle).is_err());
    }

    #[test]
    fn disabled_limiter_allows_everything() {
        let mut config = limits(1);
        config.enabled = false;
        let limiter = Ratelimiter::new(&config);
        let client = ClientAddr("192.0.2.1".to_owned());
        for _ in 0..100 {
            assert!(limiter.check(Area::Delete, &client).is_ok());
        }
        assert_eq!(limiter.cleanup(), 0);
    }
}
