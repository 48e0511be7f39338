//! Client operations relayed through a running broker.

use std::time::Duration;

use pvpi_client::{ClientError, PvPiClient};
use pvpi_link::{
    BrokerConfig, BrokerThread, Link, LinkError, LinkKind, RemoteConfig, SerialConfig,
    SimulatedDevice,
};

fn start() -> (SimulatedDevice, BrokerThread) {
    let sim = SimulatedDevice::new();
    let broker = BrokerThread::spawn(
        sim.clone(),
        BrokerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..Default::default()
        },
    )
    .unwrap();
    (sim, broker)
}

fn remote(broker: &BrokerThread) -> RemoteConfig {
    RemoteConfig {
        addr: broker.addr().to_string(),
        ..Default::default()
    }
}

#[test]
fn test_connect_prefers_broker() {
    let (sim, broker) = start();
    let serial = SerialConfig {
        port: "/dev/pvpi-does-not-exist".to_string(),
        ..Default::default()
    };

    let mut client = PvPiClient::connect(remote(&broker), serial).unwrap();
    assert_eq!(client.transport().kind(), LinkKind::Relayed);

    sim.set_battery_voltage(12.3);
    assert_eq!(client.get_battery_voltage().unwrap(), 12.3);
    client.set_watchdog(10).unwrap();
    assert_eq!(sim.state().watchdog_mins, Some(10));
}

#[test]
fn test_device_timeout_surfaces_as_link_error() {
    let (sim, broker) = start();
    sim.state().timeout = Duration::from_millis(50);
    sim.silence("GET_TEMP");

    let link = Link::Relayed(pvpi_link::RemoteClient::connect(remote(&broker)).unwrap());
    let mut client: PvPiClient = PvPiClient::new(link);
    assert!(matches!(
        client.get_board_temp(),
        Err(ClientError::Link(LinkError::TransportTimeout))
    ));
    assert!(client.get_alive().unwrap());
}

#[test]
fn test_invalid_argument_never_reaches_broker() {
    let (sim, broker) = start();
    let serial = SerialConfig::default();
    let mut client = PvPiClient::connect(remote(&broker), serial).unwrap();

    assert!(client.set_wakeup_voltage(15.0).is_err());
    assert!(client.power_off(0).is_err());
    assert!(sim.commands().is_empty());
}
