use a11ylab_markup::{normalize, MarkupError};
use std::env;
use std::fs;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: a11ylab-normalize <file.jsx|file.html>...");
        eprintln!();
        eprintln!("Examples:");
        eprintln!("  a11ylab-normalize challenge.jsx");
        eprintln!("  a11ylab-normalize snippets/*.html");
        process::exit(1);
    }

    let mut exit_code = 0;
    let multiple = args.len() > 2;

    for file_path in &args[1..] {
        match normalize_file(file_path) {
            Ok(html) => {
                if multiple {
                    println!("<!-- {} -->", file_path);
                }
                println!("{}", html);
            }
            Err(e) => {
                eprintln!("✗ {}", e);
                exit_code = 1;
            }
        }
    }

    process::exit(exit_code);
}

fn normalize_file(path: &str) -> Result<String, MarkupError> {
    let content = fs::read_to_string(path).map_err(|e| MarkupError::Io {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    Ok(normalize(&content))
}
