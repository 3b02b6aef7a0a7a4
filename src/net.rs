use embedded_svc::{ipv4, wifi};
use esp_idf_svc::wifi::{AsyncWifi, EspWifi};
use esp_idf_sys::EspError;

/// Joins the configured network, rescanning until it shows up.
pub async fn init(wifi: &mut AsyncWifi<EspWifi<'_>>, ssid: &str, password: &str) -> Result<(), EspError> {
    wifi.start().await?;
    log::info!("Wi-Fi started");

    let config = 'scan: loop {
        log::info!("starting new round of scanning for {ssid}");
        for wifi::AccessPointInfo { ssid: found, signal_strength, auth_method, .. } in wifi.scan().await? {
            if found.as_str() != ssid {
                log::debug!("skipping {found} [{signal_strength}]");
                continue;
            }
            log::info!("found network {found} [{signal_strength}]");
            break 'scan wifi::Configuration::Client(wifi::ClientConfiguration {
                password: password.into(),
                ssid: found,
                auth_method,
                ..Default::default()
            });
        }
    };

    wifi.set_configuration(&config)?;
    wifi.connect().await?;
    log::info!("successfully connected to network");

    wifi.wait_netif_up().await?;
    let ipv4::IpInfo { ip, subnet, dns, secondary_dns } = wifi.wifi().sta_netif().get_ip_info()?;
    match (dns, secondary_dns) {
        (Some(a), Some(b)) => log::info!("{ip} connected to {subnet} with DNS providers {a} and {b}"),
        (Some(dns), None) | (None, Some(dns)) => log::info!("{ip} connected to {subnet} with DNS provider {dns}"),
        _ => log::info!("{ip} connected to {subnet} without DNS providers"),
    }
    Ok(())
}
