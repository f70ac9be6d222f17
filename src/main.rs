fn main() -> anyhow::Result<()> {
    regrets_reporter_lib::run()
}
