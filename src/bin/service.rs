use std::ffi::OsString;
use tracing::Level;
#[cfg(target_os = "windows")]
use windows_service::{define_windows_service, service_dispatcher};

#[cfg(target_os = "windows")]
define_windows_service!(ffi_service_main, mentora_service_main);

fn mentora_service_main(_arguments: Vec<OsString>) {
    let rt = tokio::runtime::Runtime::new().expect("unable to create a tokio runtime");
    rt.block_on(async {
        let r = match mentora_backend::create(Some(Level::INFO)).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("Error building server: {}", e);
                return;
            }
        };

        if let Err(e) = r.launch().await {
            tracing::error!("Error launching server: {}", e);
        }
        // TODO: handle windows service stop signal
    });
}

#[cfg(target_os = "windows")]
fn main() -> Result<(), windows_service::Error> {
    // Registers `ffi_service_main` with the system and blocks this thread
    // until the service is stopped.
    service_dispatcher::start("mentora_service", ffi_service_main)?;
    Ok(())
}

#[cfg(not(target_os = "windows"))]
fn main() {
    mentora_service_main(std::env::args_os().collect());
}
