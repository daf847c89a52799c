//! Build script for quadmhe-estimator
//!
//! With the `acados` feature, compiles the acados-generated C solver for the
//! `mhe_attitude` model and links the acados libraries.
//!
//! Prerequisites:
//! - acados installed, ACADOS_SOURCE_DIR pointing at it
//! - generated solver sources in `generated/mhe_attitude/`

fn main() {
    #[cfg(feature = "acados")]
    build_acados();
}

#[cfg(feature = "acados")]
const MODEL_NAME: &str = "mhe_attitude";

#[cfg(feature = "acados")]
fn c_sources(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().map(|e| e == "c").unwrap_or(false))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(feature = "acados")]
fn build_acados() {
    use std::env;
    use std::path::PathBuf;

    println!("cargo:rerun-if-env-changed=ACADOS_SOURCE_DIR");

    let acados_dir = env::var("ACADOS_SOURCE_DIR").unwrap_or_else(|_| {
        if PathBuf::from("/opt/acados").exists() {
            "/opt/acados".to_string()
        } else if PathBuf::from("/usr/local/acados").exists() {
            "/usr/local/acados".to_string()
        } else {
            let home = env::var("HOME").unwrap_or_default();
            format!("{}/acados", home)
        }
    });
    let acados_path = PathBuf::from(&acados_dir);
    if !acados_path.exists() {
        println!("cargo:warning=acados not found at {}, set ACADOS_SOURCE_DIR", acados_dir);
        return;
    }

    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap_or_default();
    let generated_dir = PathBuf::from(manifest_dir).join("generated").join(MODEL_NAME);
    if !generated_dir.exists() {
        println!("cargo:warning=generated solver not found at {:?}", generated_dir);
        return;
    }
    println!("cargo:rerun-if-changed=generated/");

    let mut build = cc::Build::new();
    build.include(acados_path.join("include"));
    build.include(acados_path.join("include/blasfeo/include"));
    build.include(acados_path.join("include/hpipm/include"));
    build.include(&generated_dir);

    let mut sources = c_sources(&generated_dir);
    for suffix in ["model", "cost"] {
        let dir = generated_dir.join(format!("{}_{}", MODEL_NAME, suffix));
        if dir.exists() {
            build.include(&dir);
            sources.extend(c_sources(&dir));
        }
    }
    if sources.is_empty() {
        println!("cargo:warning=no C sources in {:?}", generated_dir);
        return;
    }
    for source in &sources {
        build.file(source);
    }
    build.compile("mhe_attitude_acados");

    println!("cargo:rustc-link-search=native={}/lib", acados_dir);
    println!("cargo:rustc-link-lib=acados");
    println!("cargo:rustc-link-lib=blasfeo");
    println!("cargo:rustc-link-lib=hpipm");
    println!("cargo:rustc-link-lib=m");
}
