use std::path::PathBuf;

fn main() {
    let mesh = std::env::args_os().nth(1).map(PathBuf::from);
    if let Err(err) = wgpu_deferred::run(mesh) {
        eprintln!("Application error: {err}");
    }
}
