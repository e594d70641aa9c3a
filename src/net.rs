use core::time::Duration;
use embedded_svc::{ipv4, utils::asyncify::timer::AsyncTimer, wifi};
use esp_idf_svc::{
    sntp::{EspSntp, SyncStatus},
    timer::EspTimer,
    wifi::{AsyncWifi, EspWifi},
};
use esp_idf_sys::EspError;

pub async fn init(wifi: &mut AsyncWifi<EspWifi<'_>>, ssid: &str, password: &str) -> Result<(), EspError> {
    wifi.start().await?;
    log::info!("Wi-Fi started");

    let auth_method = if password.is_empty() { wifi::AuthMethod::None } else { wifi::AuthMethod::WPA2Personal };
    wifi.set_configuration(&wifi::Configuration::Client(wifi::ClientConfiguration {
        ssid: ssid.into(),
        password: password.into(),
        auth_method,
        ..Default::default()
    }))?;
    wifi.connect().await?;
    log::info!("successfully connected to {ssid}");

    wifi.wait_netif_up().await?;
    let netif = wifi.wifi().sta_netif();
    let ipv4::IpInfo { ip, subnet, dns, secondary_dns } = netif.get_ip_info()?;
    match (dns, secondary_dns) {
        (Some(a), Some(b)) => log::info!("{ip} connected to {subnet} with DNS providers {a} and {b}"),
        (Some(dns), None) | (None, Some(dns)) => log::info!("{ip} connected to {subnet} with DNS provider {dns}"),
        _ => log::info!("{ip} connected to {subnet} without DNS providers"),
    }
    Ok(())
}

/// Starts SNTP and waits for the first sync so that readings carry wall-clock time.
/// The returned handle must be kept alive to keep the clock disciplined.
pub async fn sync_clock(timer: &mut AsyncTimer<EspTimer>) -> Result<EspSntp<'static>, EspError> {
    let sntp = EspSntp::new_default()?;
    while sntp.get_sync_status() != SyncStatus::Completed {
        log::debug!("waiting for SNTP");
        timer.after(Duration::from_millis(500))?.await;
    }
    log::info!("clock synchronized to {}", chrono::Utc::now());
    Ok(sntp)
}
