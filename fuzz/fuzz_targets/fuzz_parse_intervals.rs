#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Parsers must reject arbitrary bytes without panicking
    let _ = gridpulse::provider::types::parse_interval_payload(data);
    let _ = gridpulse::provider::types::parse_bill_forecast(data);
});
