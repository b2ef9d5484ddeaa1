use groundlink_proxy::{CancelToken, LogDisposition, Proxy};
use tracing::{error, info, warn};

use crate::cmd::ProxyArgs;
use crate::exit::{proxy_error, CliError, CliResult, INTERNAL, SUCCESS};

pub fn run(args: ProxyArgs) -> CliResult<i32> {
    let config = args.to_config();
    if args.adapters.len() > config.adapters.len() {
        warn!(
            given = args.adapters.len(),
            used = config.adapters.len(),
            "too many adapters, extra ones ignored"
        );
    }
    if config.adapters.is_empty() {
        warn!("no adapters given, serving TCP clients without a radio link");
    }

    let cancel = CancelToken::new();
    install_signal_handler(cancel.clone())?;

    let mut proxy = Proxy::from_config(&config).map_err(|err| {
        error!(error = %err, "proxy setup failed");
        proxy_error("proxy setup failed", err)
    })?;
    let report = proxy
        .run(&cancel)
        .map_err(|err| proxy_error("proxy failed", err))?;

    match &report.log {
        Some(LogDisposition::Kept { path, size }) => {
            info!(path = %path.display(), size, "telemetry log kept");
        }
        Some(LogDisposition::Removed { .. }) | None => {}
    }
    Ok(SUCCESS)
}

fn install_signal_handler(cancel: CancelToken) -> CliResult<()> {
    ctrlc::set_handler(move || cancel.cancel()).map_err(|err| {
        CliError::new(INTERNAL, format!("signal handler setup failed: {err}"))
    })
}
