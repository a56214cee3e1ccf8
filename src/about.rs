pub const DE_ATLAS_DISPLAY_VERSION: &str = env!("DE_ATLAS_DISPLAY_VERSION");
pub const DE_ATLAS_BUILD_N: &str = env!("DE_ATLAS_BUILD_N");

pub fn version_cli_text() -> String {
    format!(
        "DE Atlas {}\nBuild {}\nDifferential-expression query engine for blood cell types",
        DE_ATLAS_DISPLAY_VERSION, DE_ATLAS_BUILD_N
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_text_names_the_build() {
        let text = version_cli_text();
        assert!(text.starts_with("DE Atlas "));
        assert!(text.contains(&format!("Build {DE_ATLAS_BUILD_N}")));
    }
}
