fn main() {
    // Only the firmware build links ESP-IDF; host builds run against the simulator.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}
