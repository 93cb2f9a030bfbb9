fn main() -> anyhow::Result<()> {
    daily_message::cli::run()
}
