/*
 * This file is part of the IVMS Online.
 *
 * @copyright 2023 © by Rafał Wrzeszcz - Wrzasq.pl.
 */

use tracing_subscriber::EnvFilter;

/// JSON log lines for CloudWatch; level filtering follows `RUST_LOG`.
pub fn init_tracing() {
    // warm containers may bootstrap twice, the first subscriber stays
    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .without_time()
        .try_init();
}

/// Sets up logging and serves the handler closure as the Lambda function.
#[macro_export]
macro_rules! run_lambda {
    ($handler:expr) => {{
        $crate::init_tracing();
        $crate::lambda_runtime::run($crate::lambda_runtime::service_fn($handler)).await
    }};
}

#[cfg(test)]
mod tests {
    use crate::lambda::init_tracing;

    #[test]
    fn repeated_initialization() {
        init_tracing();
        init_tracing();
    }

    #[test]
    fn runtime_is_reachable_through_the_crate() {
        let _handler = crate::lambda_runtime::service_fn(|event: crate::lambda_runtime::LambdaEvent<String>| async move {
            Ok::<_, crate::lambda_runtime::Error>(event.payload)
        });
    }
}
