//! Graphics descriptor parsing
//!
//! Extracts `<graphics>` devices from a domain descriptor and resolves them
//! into dialable console endpoints.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use virtgate_common::{ConsoleEndpoint, ConsoleType, Error, Result};

/// A `<graphics>` device as declared in the domain descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphicsDevice {
    pub device_type: String,
    pub port: Option<i32>,
    pub autoport: bool,
    pub listen: String,
    pub password: Option<String>,
    pub tls_port: Option<u16>,
}

/// Parse all graphics devices out of a domain descriptor
pub fn parse_graphics_devices(xml: &str) -> Result<Vec<GraphicsDevice>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut devices = Vec::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                if e.local_name().as_ref() == b"graphics" {
                    devices.push(device_from_element(&e)?);
                }
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"graphics" {
                    devices.push(device_from_element(&e)?);
                }
            }
            Ok(Event::End(_)) => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    Error::Internal("malformed domain XML: unbalanced end tag".to_string())
                })?;
            }
            Ok(Event::Eof) => {
                if depth != 0 {
                    return Err(Error::Internal(
                        "malformed domain XML: unexpected end of input".to_string(),
                    ));
                }
                break;
            }
            Ok(_) => {}
            Err(e) => {
                return Err(Error::Internal(format!("malformed domain XML: {}", e)));
            }
        }
    }

    Ok(devices)
}

fn device_from_element(element: &BytesStart<'_>) -> Result<GraphicsDevice> {
    let mut device = GraphicsDevice::default();

    for attr in element.attributes() {
        let attr =
            attr.map_err(|e| Error::Internal(format!("malformed graphics attribute: {}", e)))?;
        let value = attr
            .unescape_value()
            .map_err(|e| Error::Internal(format!("malformed graphics attribute: {}", e)))?
            .into_owned();

        match attr.key.local_name().as_ref() {
            b"type" => device.device_type = value,
            b"port" => device.port = value.parse().ok(),
            b"autoport" => device.autoport = value == "yes",
            b"listen" => device.listen = value,
            b"passwd" => {
                if !value.is_empty() {
                    device.password = Some(value);
                }
            }
            b"tlsPort" => device.tls_port = value.parse().ok(),
            _ => {}
        }
    }

    Ok(device)
}

/// Resolve declared devices into dialable endpoints.
///
/// Devices of unknown type or with no resolvable port are skipped.
pub fn resolve_endpoints(devices: &[GraphicsDevice]) -> Vec<ConsoleEndpoint> {
    devices.iter().filter_map(resolve_device).collect()
}

fn resolve_device(device: &GraphicsDevice) -> Option<ConsoleEndpoint> {
    let console_type = ConsoleType::parse(&device.device_type)?;

    let port = match device.port {
        Some(p) if p > 0 => u16::try_from(p).ok()?,
        // Autoport sentinel (-1) or missing port. The real runtime port
        // would need a live hypervisor query, which the domain lookup
        // boundary does not expose, so fall back to the protocol default.
        _ => default_port(console_type),
    };

    Some(ConsoleEndpoint {
        console_type,
        host: normalize_listen(&device.listen),
        port,
        tls_port: device.tls_port,
        password: device.password.clone(),
    })
}

/// Static default port per protocol, used when autoport left the declared
/// port unresolved
fn default_port(console_type: ConsoleType) -> u16 {
    match console_type {
        ConsoleType::Vnc => 5900,
        ConsoleType::Spice => 5930,
    }
}

/// Never hand an externally routable bind address to the dialer
fn normalize_listen(listen: &str) -> String {
    if listen.is_empty() || listen == "0.0.0.0" {
        "localhost".to_string()
    } else {
        listen.to_string()
    }
}
