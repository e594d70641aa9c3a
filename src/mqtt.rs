use embedded_svc::mqtt::client::QoS;
use esp_idf_svc::{
    mqtt::client::{EspMqttClient, MqttClientConfiguration},
    tls::X509,
};
use esp_idf_sys::EspError;

use crate::{
    config::Mqtt,
    reading::Reading,
    transmit::{Transmit, TransmitError},
};

/// The TLS layer wants NUL-terminated PEM that outlives the client.
fn pem(contents: Option<&'static str>) -> Option<X509<'static>> {
    let mut bytes = contents?.as_bytes().to_vec();
    bytes.push(0);
    Some(X509::pem_until_nul(Vec::leak(bytes)))
}

/// Publishes each reading to a topic with at-least-once delivery. The broker is
/// typically a cloud IoT hub authenticating the device by its client certificate.
pub struct MqttSink {
    client: EspMqttClient<'static>,
    topic: &'static str,
}

impl MqttSink {
    pub fn connect(settings: &Mqtt) -> Result<Self, EspError> {
        let conf = MqttClientConfiguration {
            client_id: Some(settings.thing_name),
            server_certificate: pem(settings.ca_cert),
            client_certificate: pem(settings.client_cert),
            private_key: pem(settings.private_key),
            ..Default::default()
        };
        let client = EspMqttClient::new(settings.url, &conf, |event| {
            log::debug!("broker event: {event:?}");
        })?;
        log::info!("MQTT client started for {} as {}", settings.url, settings.thing_name);
        Ok(Self { client, topic: settings.topic })
    }
}

impl Transmit for MqttSink {
    async fn send(&mut self, reading: &Reading) -> Result<(), TransmitError> {
        let bytes = reading.to_json()?;
        let id = self.client.publish(self.topic, QoS::AtLeastOnce, false, &bytes)?;
        log::debug!("queued message {id} on {}", self.topic);
        Ok(())
    }
}
