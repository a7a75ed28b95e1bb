//! Statsd metrics via [`cadence`].
//!
//! The client is process-global and configured once at startup. When no
//! statsd address is configured, the `metric!` macro is a no-op.

use std::net::{ToSocketAddrs, UdpSocket};
use std::ops::Deref;
use std::sync::Arc;

use anyhow::{Context, Result};
use cadence::{BufferedUdpMetricSink, Metric, MetricBuilder, QueuingMetricSink, StatsdClient};
use lazy_static::lazy_static;
use parking_lot::RwLock;

lazy_static! {
    static ref METRICS_CLIENT: RwLock<Option<Arc<MetricsClient>>> = RwLock::new(None);
}

pub mod prelude {
    pub use cadence::prelude::*;
}

pub struct MetricsClient {
    statsd_client: StatsdClient,
    hostname_tag: Option<(String, String)>,
}

impl Deref for MetricsClient {
    type Target = StatsdClient;

    fn deref(&self) -> &Self::Target {
        &self.statsd_client
    }
}

impl MetricsClient {
    pub fn send_metric<'a, T>(&'a self, mut metric: MetricBuilder<'a, 'a, T>)
    where
        T: Metric + From<String>,
    {
        if let Some((tag, value)) = &self.hostname_tag {
            metric = metric.with_tag(tag, value);
        }
        metric.send()
    }
}

/// Creates the global statsd client sending to `host`.
pub fn configure_statsd<A: ToSocketAddrs>(
    prefix: &str,
    host: A,
    hostname_tag: Option<String>,
) -> Result<()> {
    let addrs: Vec<_> = host
        .to_socket_addrs()
        .context("failed to resolve statsd host")?
        .collect();
    if let Some(addr) = addrs.first() {
        tracing::info!("Reporting metrics to statsd at {}", addr);
    }

    let socket = UdpSocket::bind("0.0.0.0:0").context("failed to bind statsd socket")?;
    socket
        .set_nonblocking(true)
        .context("failed to configure statsd socket")?;
    let udp_sink = BufferedUdpMetricSink::from(&addrs[..], socket)
        .context("failed to create statsd sink")?;
    let sink = QueuingMetricSink::from(udp_sink);

    let hostname_tag = hostname_tag.and_then(|tag| {
        let name = hostname::get().ok()?.into_string().ok()?;
        Some((tag, name))
    });

    let client = MetricsClient {
        statsd_client: StatsdClient::from_sink(prefix, sink),
        hostname_tag,
    };
    *METRICS_CLIENT.write() = Some(Arc::new(client));

    Ok(())
}

/// Invokes `f` with the configured client, or returns the default when
/// metrics are disabled.
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&MetricsClient) -> R,
    R: Default,
{
    let guard = METRICS_CLIENT.read();
    match *guard {
        Some(ref client) => f(client),
        None => R::default(),
    }
}

#[macro_export]
macro_rules! metric {
    (counter($id:expr) += $value:expr $(, $k:expr => $v:expr)* $(,)?) => {{
        #[allow(unused_imports)]
        use $crate::metrics::prelude::*;
        $crate::metrics::with_client(|client| {
            client.send_metric(
                client.count_with_tags($id, $value)
                $(.with_tag($k, $v))*
            )
        })
    }};

    (timer($id:expr) = $value:expr $(, $k:expr => $v:expr)* $(,)?) => {{
        #[allow(unused_imports)]
        use $crate::metrics::prelude::*;
        $crate::metrics::with_client(|client| {
            client.send_metric(
                client.time_duration_with_tags($id, $value)
                $(.with_tag($k, $v))*
            )
        })
    }};

    (histogram($id:expr) = $value:expr $(, $k:expr => $v:expr)* $(,)?) => {{
        #[allow(unused_imports)]
        use $crate::metrics::prelude::*;
        $crate::metrics::with_client(|client| {
            client.send_metric(
                client.histogram_with_tags($id, $value)
                $(.with_tag($k, $v))*
            )
        })
    }};
}
