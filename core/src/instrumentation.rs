use std::sync::Once;

static INIT: Once = Once::new();

pub fn init_instrumentation() {
    INIT.call_once(|| {
        // Check if we should use console subscriber (for tokio-console debugging)
        // This is determined by the TOKIO_CONSOLE_BIND environment variable
        if std::env::var("TOKIO_CONSOLE_BIND").is_ok() {
            console_subscriber::init();
        } else {
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
                )
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .finish();

            #[allow(clippy::expect_used)]
            // Failure to set up logging should cause the process to fail fast.
            tracing::subscriber::set_global_default(subscriber)
                .expect("Failed to set tracing subscriber");
        }
    });
}
