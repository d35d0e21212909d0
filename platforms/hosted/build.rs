use hosted_config::PlatformConfig;

fn main() -> miette::Result<()> {
    ember_config::buildtime::render_file::<PlatformConfig>("hosted.toml")
}
