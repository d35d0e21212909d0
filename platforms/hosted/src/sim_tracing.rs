const ENV_FILTER: &str = "EMBER_TRACE";

#[derive(Debug, clap::Args)]
pub struct TracingOpts {
    /// Filter directives for the trace output, in `EnvFilter` syntax.
    #[arg(long = "trace", env = ENV_FILTER, default_value = "info")]
    pub filter: String,
}

impl TracingOpts {
    pub fn setup_tracing(&self) {
        use tracing_subscriber::prelude::*;

        let subscriber = tracing_subscriber::registry();

        // if `trace-fmt` is enabled, add a `tracing-subscriber::fmt` layer along
        // with an `EnvFilter`
        #[cfg(feature = "trace-fmt")]
        let subscriber = {
            let filter = tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .parse_lossy(&self.filter);
            subscriber.with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(atty::is(atty::Stream::Stdout))
                    .with_thread_names(true)
                    .with_filter(filter),
            )
        };

        subscriber.init();
    }
}
