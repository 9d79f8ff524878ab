use media_pipeline::preflight::Preflight;

fn main() {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let report = Preflight::default().run_from_env();
    report.log();

    std::process::exit(if report.passed() { 0 } else { 1 });
}
