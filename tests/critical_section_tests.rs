//! Kept in its own binary so no other test contends for the global
//! critical section while it is being watched.

mod common;

use common::{critical_section_held, with_checksum, Sensor, Waveform};
use dht_mqtt::{Config, Dht, Status};

#[test]
fn test_sampling_holds_critical_section_only_when_configured() {
    let sensor = Sensor::new();
    sensor
        .watch_critical_section()
        .script(Waveform::frame(with_checksum([0x02, 0x8A, 0x00, 0xEB])))
        .script(Waveform::silent())
        .script(Waveform::frame(with_checksum([0x01, 0x90, 0x80, 0x05])));

    let config = Config::default().with_disable_interrupts(true);
    let mut guarded = Dht::with_config(sensor.pin(), sensor.timing(), config);
    assert_eq!(guarded.read().status, Status::Ok);
    assert_eq!(guarded.read().status, Status::TimeoutError);
    assert!(!critical_section_held());

    let mut plain = Dht::new(sensor.pin(), sensor.timing());
    assert_eq!(plain.read().status, Status::Ok);

    assert_eq!(sensor.section_samples(), vec![true, true, false]);
}
