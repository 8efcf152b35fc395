use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};
use tracing::info;

fn load_config_file(path: &str, figment: Figment) -> Figment {
    if path.ends_with(".toml") {
        return figment.merge(Toml::file(path));
    }
    figment.merge(Json::file(path))
}

fn load_config_in_dir(name: &str, path: &str, mut figment: Figment) -> Figment {
    for ext in ["toml", "json"] {
        let filename = format!("{}/{}.{}", path, name, ext);
        if std::path::Path::new(&filename).exists() {
            info!("Loading config file: {}", filename);
            figment = load_config_file(&filename, figment);
        }
    }
    figment
}

fn search_load_config(
    name: &str,
    search_paths: &[&str],
    default_toml: &str,
    leaf_config: Option<&str>,
) -> Figment {
    let mut figment = Figment::from(Toml::string(default_toml));
    for path in search_paths {
        figment = load_config_in_dir(name, path, figment);
    }
    match leaf_config {
        Some(path) => load_config_file(path, figment),
        None => figment,
    }
}

/// Layers `default_toml`, `/etc/{name}/{name}.{toml,json}`, `./{name}.{toml,json}` and
/// finally `leaf_config`, later sources overriding earlier ones.
pub fn load_config(name: &str, default_toml: &str, leaf_config: Option<&str>) -> Figment {
    let etc_path = format!("/etc/{name}");
    search_load_config(name, &[&etc_path, "."], default_toml, leaf_config)
}

/// Environment variables starting with `prefix` as config keys.
///
/// A `-` in a variable name reads as `_`, and variables set to an empty string are skipped,
/// so unset workflow inputs do not override file values.
pub fn env_inputs(prefix: &str) -> Env {
    let owned_prefix = prefix.to_string();
    Env::prefixed(prefix)
        .filter(move |key| has_value(&owned_prefix, key.as_str()))
        .map(|key| key.as_str().replace('-', "_").into())
}

fn has_value(prefix: &str, key: &str) -> bool {
    std::env::vars().any(|(name, value)| {
        if value.trim().is_empty() || name.len() != prefix.len() + key.len() {
            return false;
        }
        let (head, tail) = name.split_at(prefix.len());
        head.eq_ignore_ascii_case(prefix) && tail.eq_ignore_ascii_case(key)
    })
}
