#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = course_assessments::run().await {
        eprintln!("course-assessments fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
