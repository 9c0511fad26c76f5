fn main() -> anyhow::Result<()> {
    mkcard::run()
}
