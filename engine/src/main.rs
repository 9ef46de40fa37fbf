fn main() {
    std::process::exit(study_engine_lib::run())
}
