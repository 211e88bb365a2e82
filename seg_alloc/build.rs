use std::env::{self, VarError};
use std::fs::File;
use std::io::Write;
use std::path::Path;

const DEFAULT_MAX_HEAP_BYTES: usize = 1024 * 1024 * 32;
const SEG_ALLOC_MAX_HEAP_BYTES: &str = "SEG_ALLOC_MAX_HEAP_BYTES";

fn main() {
    create_max_heap_bytes_file();
    export_rerun_rules();
}

fn create_max_heap_bytes_file() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR environment variable not provided");
    let dest_path = Path::new(&out_dir).join("seg_alloc_max_heap_bytes.txt");
    let size: usize = match env::var(SEG_ALLOC_MAX_HEAP_BYTES) {
        Ok(s) => s
            .parse()
            .expect("Could not interpret SEG_ALLOC_MAX_HEAP_BYTES as an unsigned integer"),
        Err(VarError::NotPresent) => DEFAULT_MAX_HEAP_BYTES,
        Err(VarError::NotUnicode(_)) => {
            panic!("Could not interpret SEG_ALLOC_MAX_HEAP_BYTES as a string")
        }
    };
    let mut f = File::create(&dest_path)
        .expect("Could not create file to store the seg_alloc heap size limit.");
    write!(f, "{}", size).expect("Could not write the seg_alloc heap size limit file");
    f.flush()
        .expect("Could not flush write to the seg_alloc heap size limit file");
}

fn export_rerun_rules() {
    println!("cargo:rerun-if-env-changed={}", SEG_ALLOC_MAX_HEAP_BYTES);
    for path in ["./Cargo.toml", "./build.rs", "./src/config.rs"].iter() {
        println!("cargo:rerun-if-changed={}", path);
    }
}
