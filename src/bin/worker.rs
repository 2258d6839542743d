#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = course_assessments::run_worker().await {
        eprintln!("course-assessments-worker fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
