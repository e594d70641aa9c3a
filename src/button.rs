use core::sync::atomic::{AtomicBool, Ordering};

/// Cooperative stop request observed by the report loop between cycles.
#[derive(Debug, Default)]
pub struct Shutdown {
    requested: AtomicBool,
}

impl Shutdown {
    pub const fn new() -> Self {
        Self { requested: AtomicBool::new(false) }
    }

    pub fn request(&self) {
        log::warn!("shutdown requested");
        self.requested.store(true, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Relaxed)
    }
}

#[cfg(target_os = "espidf")]
pub use device::stop;

#[cfg(target_os = "espidf")]
mod device {
    use esp_idf_hal::gpio::{Input, InputPin, PinDriver};
    use esp_idf_sys::EspError;

    use super::Shutdown;

    /// Requests a shutdown once the (pull-up) stop button is pressed.
    pub async fn stop<T: InputPin>(mut button: PinDriver<'_, T, Input>, shutdown: &Shutdown) -> Result<(), EspError> {
        button.wait_for_falling_edge().await?;
        log::info!("stop button pressed");
        shutdown.request();
        Ok(())
    }
}
