fn main() {
    // Host builds only run the unit tests, so there is no ESP-IDF environment to forward.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}
