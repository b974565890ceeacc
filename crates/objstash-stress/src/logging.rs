use std::env;
use std::future::Future;
use std::io::Write;
use std::net::{SocketAddr, UdpSocket};
use std::pin::Pin;

use anyhow::{Context, Result};
use objstash_service::config::Metrics;
use objstash_service::metrics;
use tracing_subscriber::fmt::fmt;
use tracing_subscriber::fmt::time::UtcTime;

#[derive(Debug, Default)]
pub struct Config {
    pub backtraces: bool,
    pub tracing: bool,
    pub metrics: bool,
}

#[derive(Default)]
pub struct Guard {
    pub udp_sink: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
}

/// Sets up logging and metrics for the stresstest.
///
/// # Safety
/// This function uses [`std::env::set_var`] and may only be called in a single-threaded context.
pub unsafe fn init(config: Config, metrics_config: &Metrics) -> Result<Guard> {
    if config.backtraces {
        // SAFETY: As documented, this function may only be called in a single-threaded context.
        unsafe { env::set_var("RUST_BACKTRACE", "1") };
    }

    let mut guard = Guard::default();

    if config.tracing {
        let rust_log = "INFO,objstash_service=DEBUG";
        let subscriber = fmt()
            .with_timer(UtcTime::rfc_3339())
            .with_target(true)
            .with_env_filter(rust_log);

        // we want all the tracing machinery to be active, but not spam the console,
        // so redirect everything into the void:
        let subscriber = subscriber.with_writer(|| NoopWriter);

        // this should mimic the settings used in production:
        subscriber
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_file(true)
            .with_line_number(true)
            .init();
    }

    if config.metrics {
        let mut tags = metrics_config.custom_tags.clone();
        if let Some(tag) = metrics_config.hostname_tag.clone() {
            if let Some(hostname) = hostname::get().ok().and_then(|s| s.into_string().ok()) {
                tags.insert(tag, hostname);
            }
        }

        let host = match &metrics_config.statsd {
            Some(statsd) => statsd.clone(),
            None => {
                let addr = SocketAddr::from(([127, 0, 0, 1], 0));
                let listener = UdpSocket::bind(addr).context("failed to bind metrics sink")?;
                listener.set_nonblocking(true)?;
                let socket = listener.local_addr()?;

                guard.udp_sink = Some(Box::pin(async move {
                    let Ok(listener) = tokio::net::UdpSocket::from_std(listener) else {
                        return;
                    };
                    let mut buf = Vec::with_capacity(1024);
                    loop {
                        buf.clear();
                        if listener.recv_buf(&mut buf).await.is_err() {
                            return;
                        }
                    }
                }));

                // have some default tags, just to be closer to the real world config
                tags.entry("env".into()).or_insert_with(|| "stresstest".into());
                tags.entry("host".into()).or_insert_with(|| "stresstest".into());

                format!("127.0.0.1:{}", socket.port())
            }
        };

        metrics::configure_statsd(&metrics_config.prefix, host, tags)
            .context("failed to configure statsd")?;
    }

    Ok(guard)
}

struct NoopWriter;
impl Write for NoopWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        // try to prevent the compiler from optimizing away all the formatting code:
        let buf = std::hint::black_box(buf);

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
