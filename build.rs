fn main() {
    // Host builds (unit tests, simulators) have no ESP-IDF environment to export
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}
