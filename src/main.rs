fn main() -> std::process::ExitCode {
    favsort_lib::run()
}
