//! # Ember Configuration
//!
//! Platform configuration is written in TOML, checked and rendered to
//! [`postcard`] at build time, and embedded in the platform binary. This
//! crate is used by platform crates in two places.
//!
//! ## In a `build.rs` script
//!
//! ```toml
//! [build-dependencies]
//! ember-config = { path = "../../source/config", features = ["use-std"] }
//! ```
//!
//! ```rust,ignore
//! use ember_config::buildtime::render_file;
//! fn main() {
//!     render_file::<YOUR_CONFIG_TYPE>("YOUR_PLATFORM.toml").unwrap();
//! }
//! ```
//!
//! [`buildtime::render_all`] renders every `.toml` file in a directory
//! instead, for platforms with one config per board.
//!
//! ## In the platform binary
//!
//! ```toml
//! [dependencies]
//! ember-config = { path = "../../source/config" }
//! ```
//!
//! ```rust,ignore
//! let config = ember_config::include_config!(YOUR_CONFIG_TYPE).unwrap();
//! ```
//!
//! The platform-specific config type should live in its own small crate, so
//! that both the build script and the binary can depend on it.

#![cfg_attr(not(any(feature = "use-std", test)), no_std)]

use ember_kernel::KernelSettings;
use serde::{Deserialize, Serialize};

/// The top level configuration type
///
/// This type is generic over the platform-specific configuration type
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmberConfig<Platform> {
    #[serde(default)]
    pub kernel: KernelSettings,
    pub platform: Platform,
}

/// Set by [`buildtime::render_all`] to the directory holding rendered configs.
pub const CONFIG_DIR_VAR: &str = "EMBER_CONFIG_DIR";
/// Set by [`buildtime::render_file`] to the path of the rendered config.
pub const CONFIG_FILE_VAR: &str = "EMBER_CONFIG";

/// Tools intended for use in build.rs scripts
#[cfg(any(feature = "use-std", test))]
pub mod buildtime {
    const OUT_DIR: &str = "OUT_DIR";
    const TAG: &str = concat!(module_path!(), ":");

    use std::{env, ffi::OsStr, fs, path::Path};

    use super::*;
    use miette::{Context, IntoDiagnostic, Result};
    use serde::de::DeserializeOwned;

    /// Parses and checks a TOML config, returning it rendered to postcard.
    pub fn render_str<Platform>(toml: &str) -> Result<Vec<u8>>
    where
        Platform: Serialize + DeserializeOwned + 'static,
    {
        let config: EmberConfig<Platform> = toml::from_str(toml)
            .into_diagnostic()
            .wrap_err("Failed to parse config")?;
        postcard::to_stdvec(&config)
            .into_diagnostic()
            .wrap_err("Failed to serialize config")
    }

    /// Render all configuration files in the given directory.
    ///
    /// The resulting configs are stored in the cargo `OUT_DIR`, and may be
    /// referenced by name in the main platform binary when using
    /// [`include_config!()`].
    pub fn render_all<Platform>(config_dir: impl AsRef<Path>) -> Result<()>
    where
        Platform: Serialize + DeserializeOwned + 'static,
    {
        let config_dir = config_dir.as_ref();
        let dir_disp = config_dir.display();
        let out_dir = out_dir()?;

        println!("cargo:rerun-if-changed={dir_disp}");
        println!("cargo:rustc-env={CONFIG_DIR_VAR}={out_dir}");
        eprintln!("{TAG} rendering configs in '{dir_disp}'...");

        let entries = fs::read_dir(config_dir)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to read config directory '{dir_disp}'"))?;

        let mut rendered = 0;
        let mut skipped = 0;
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    println!("cargo:warning=Error reading config dir entry: {e}");
                    continue;
                }
            };

            if !path.is_file() || path.extension() != Some(OsStr::new("toml")) {
                eprintln!("{TAG}   '{}' is not a TOML file; skipping", path.display());
                skipped += 1;
                continue;
            }

            render_file_to::<Platform>(&path, &out_dir)?;
            rendered += 1;
        }

        if rendered == 0 {
            Err(
                miette::MietteDiagnostic::new("No config files were rendered!")
                    .with_help(format!("'{dir_disp}' contained {skipped} other entries")),
            )?;
        }

        Ok(())
    }

    /// Load a configuration file from the given path, will be made available
    /// to the main platform binary when they call [`include_config!()`].
    pub fn render_file<Platform>(path: impl AsRef<Path>) -> Result<()>
    where
        Platform: Serialize + DeserializeOwned + 'static,
    {
        let out_dir = out_dir()?;
        render_file_to::<Platform>(path.as_ref(), out_dir)
    }

    fn out_dir() -> Result<String> {
        let out_dir = env::var(OUT_DIR)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to read '{OUT_DIR}' env variable"))?;
        eprintln!("{TAG} {OUT_DIR}='{out_dir}'");
        Ok(out_dir)
    }

    fn render_file_to<Platform>(path: &Path, out: impl AsRef<Path>) -> Result<()>
    where
        Platform: Serialize + DeserializeOwned + 'static,
    {
        let path_disp = path.display();
        (|| {
            let filename = path
                .file_name()
                .ok_or_else(|| miette::miette!("Path has no filename!"))?;
            eprintln!("{TAG} rendering config file '{path_disp}'");

            let toml = fs::read_to_string(path).into_diagnostic()?;
            let rendered = render_str::<Platform>(&toml)?;

            let mut out = out.as_ref().join(filename);
            out.set_extension("postcard");
            fs::write(&out, rendered).into_diagnostic()?;

            println!("cargo:rustc-env={CONFIG_FILE_VAR}={}", out.display());
            println!("cargo:rerun-if-changed={path_disp}");
            Ok::<_, miette::Report>(())
        })()
        .wrap_err_with(|| format!("Failed to render config file '{path_disp}'"))
    }
}

/// Tools intended for use at runtime
pub mod runtime {
    use core::fmt;

    use crate::EmberConfig;
    use serde::de::DeserializeOwned;

    #[derive(Debug, PartialEq)]
    pub enum Error {
        Postcard(postcard::Error),
    }

    pub fn from_postcard<Platform>(s: &[u8]) -> Result<EmberConfig<Platform>, Error>
    where
        Platform: DeserializeOwned + 'static,
    {
        postcard::from_bytes(s).map_err(Error::Postcard)
    }

    impl fmt::Display for Error {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::Postcard(e) => write!(f, "invalid embedded config: {e}"),
            }
        }
    }
}

/// Load the configuration rendered by [`buildtime`] in a build.rs.
///
/// Should be called with the type of your platform specific type
#[macro_export]
macro_rules! include_config {
    ($platform: ty, $name: literal) => {{
        const EMBER_CONFIG: &[u8] =
            include_bytes!(concat!(env!("EMBER_CONFIG_DIR"), "/", $name, ".postcard"));
        $crate::runtime::from_postcard::<$platform>(EMBER_CONFIG)
    }};
    ($platform: ty) => {{
        const EMBER_CONFIG: &[u8] = include_bytes!(env!("EMBER_CONFIG"));
        $crate::runtime::from_postcard::<$platform>(EMBER_CONFIG)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Board {
        name: String,
        leds: u8,
    }

    #[test]
    fn toml_renders_and_loads_back() {
        let toml = r#"
            [kernel]
            heap_size = 8192
            log_dispatch = true

            [platform]
            name = "devkit"
            leds = 3
        "#;

        let bytes = buildtime::render_str::<Board>(toml).unwrap();
        let config = runtime::from_postcard::<Board>(&bytes).unwrap();
        assert_eq!(config.kernel.heap_size, 8192);
        assert!(config.kernel.log_dispatch);
        assert_eq!(
            config.platform,
            Board {
                name: "devkit".into(),
                leds: 3
            }
        );
    }

    #[test]
    fn kernel_section_is_optional() {
        let toml = r#"
            [platform]
            name = "bare"
            leds = 0
        "#;
        let bytes = buildtime::render_str::<Board>(toml).unwrap();
        let config = runtime::from_postcard::<Board>(&bytes).unwrap();
        assert_eq!(config.kernel.heap_size, KernelSettings::DEFAULT_HEAP_SIZE);
    }

    #[test]
    fn unknown_sections_are_rejected() {
        let toml = r#"
            [platform]
            name = "bare"
            leds = 0

            [services]
            spi = true
        "#;
        assert!(buildtime::render_str::<Board>(toml).is_err());
    }

    #[test]
    fn render_file_writes_postcard_to_out_dir() {
        let dir = std::env::temp_dir().join(format!("ember-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let toml_path = dir.join("devkit.toml");
        std::fs::write(
            &toml_path,
            "[kernel]\nheap_size = 2048\n\n[platform]\nname = \"devkit\"\nleds = 1\n",
        )
        .unwrap();
        std::env::set_var("OUT_DIR", &dir);

        // any `AsRef<Path>` works, not just `&Path`
        buildtime::render_file::<Board>(toml_path.to_string_lossy().into_owned()).unwrap();

        let bytes = std::fs::read(dir.join("devkit.postcard")).unwrap();
        let config = runtime::from_postcard::<Board>(&bytes).unwrap();
        assert_eq!(config.kernel.heap_size, 2048);
        assert_eq!(config.platform.leds, 1);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn truncated_postcard_is_an_error() {
        let toml = r#"
            [platform]
            name = "bare"
            leds = 0
        "#;
        let bytes = buildtime::render_str::<Board>(toml).unwrap();
        let err = runtime::from_postcard::<Board>(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, runtime::Error::Postcard(_)));
    }
}
