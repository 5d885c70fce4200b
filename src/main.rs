fn main() -> std::process::ExitCode {
    efficiency_tracker::run()
}
