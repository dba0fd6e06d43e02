use std::sync::Once;

use kiln_config::{init_tracing_with_config, KilnConfig};

/// Initialize structured logging and install a process-wide panic hook.
///
/// The hook records the panic through `tracing` before deferring to the
/// previous hook; stdout carries DAP frames, so nothing is printed there.
pub fn init(config: &KilnConfig) {
    init_tracing_with_config(config);
    install_panic_hook();
}

fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let location = info
                .location()
                .map(|loc| format!("{}:{}", loc.file(), loc.line()))
                .unwrap_or_else(|| "<unknown>".to_owned());
            let message = panic_message(info.payload());
            tracing::error!(target: "kiln.dap", %location, message, "panic");
            previous(info);
        }));
    });
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}
