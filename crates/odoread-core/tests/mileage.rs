use odoread_core::mileage::{decode, miles_to_km, MileageReading};
use odoread_core::protocol::{locate_payload, ProtocolError};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn frame(counter: u16) -> String {
    format!("85 13 51 f9 03 {:02x} {:02x} 85", counter & 0xff, counter >> 8)
}

#[test]
fn test_reference_frame() {
    let reading = decode("85 13 51 F9 03 5D 43 85").unwrap();
    assert_eq!(
        reading,
        MileageReading {
            miles: 172450,
            kilometers: 277531,
        }
    );
    assert_eq!(reading.to_string(), "172450 miles, 277531 kilometers");
}

#[test]
fn test_counter_extremes() {
    assert_eq!(decode(&frame(0)).unwrap().miles, 0);
    let max = decode(&frame(u16::MAX)).unwrap();
    assert_eq!(max.miles, 655350);
    assert_eq!(max.kilometers, 1054683);
}

#[test]
fn test_kilometers_truncate() {
    // 10 mi = 16.09344 km
    assert_eq!(miles_to_km(10), 16);
    // 1000 mi = 1609.344 km
    assert_eq!(miles_to_km(1000), 1609);
}

#[test]
fn test_short_or_malformed_frames_are_rejected() {
    for payload in [
        "",
        "85 13 51 F9 03 5D",
        "85 13 51 F9 03 5 43 85",
        "85 13 51 F9 03 5D 4G 85",
        "85 13 51 F9 03 5D 143 85",
    ] {
        assert!(
            matches!(decode(payload), Err(ProtocolError::UnexpectedPayload(_))),
            "{payload:?}"
        );
    }
}

#[test]
fn test_only_first_line_is_decoded() {
    let reading = decode("85 13 51 F9 03 5D 43 85\r85 13 51 F9 03 00 00 85").unwrap();
    assert_eq!(reading.miles, 172450);
}

proptest! {
    #[test]
    fn prop_counter_scales_to_miles_and_km(counter in any::<u16>()) {
        let reading = decode(&frame(counter)).unwrap();
        let miles = u64::from(counter) * 10;
        prop_assert_eq!(reading.miles, miles);
        // Exact in f64 for every u16 counter
        let expected_km = (miles as f64 * 1.609344).floor() as u64;
        prop_assert_eq!(reading.kilometers, expected_km);
    }

    #[test]
    fn prop_leading_frames_do_not_change_the_reading(
        counter in any::<u16>(),
        pending in proptest::collection::vec(any::<u8>(), 0..6),
    ) {
        let noise: Vec<String> = pending.iter().map(|b| format!("{b:02X}")).collect();
        let reply = format!(
            "BUS INIT: ...OK\r84 13 51 7E {}\r{}",
            noise.join(" "),
            frame(counter)
        );
        let payload = locate_payload(&reply).unwrap();
        prop_assert_eq!(decode(payload).unwrap(), decode(&frame(counter)).unwrap());
    }
}

#[test]
fn test_reading_serializes_as_flat_object() {
    let reading = decode("85 13 51 F9 03 5D 43 85").unwrap();
    let value = serde_json::to_value(reading).unwrap();
    assert_eq!(
        value,
        serde_json::json!({ "miles": 172450, "kilometers": 277531 })
    );
}
