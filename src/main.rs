//! forge – command-line email template compiler.
//!
//! Usage:
//!   forge [--src DIR] [--dist DIR] [--css FILE] [--config FILE] [--no-includes] [--stdout] [TEMPLATE]
//!
//! With a TEMPLATE name only that template is compiled; otherwise every
//! template under the source directory is compiled and a JSON report is
//! printed.

use std::{env, path::PathBuf, process};

use mail_forge::{CompileConfig, Compiler};

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut src: Option<PathBuf> = None;
    let mut dist: Option<PathBuf> = None;
    let mut css: Option<PathBuf> = None;
    let mut no_includes = false;
    let mut to_stdout = false;
    let mut template: Option<String> = None;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--src" | "-s" => src = Some(PathBuf::from(value(&mut iter, arg, &args[0]))),
            "--dist" | "-d" => dist = Some(PathBuf::from(value(&mut iter, arg, &args[0]))),
            "--css" | "-c" => css = Some(PathBuf::from(value(&mut iter, arg, &args[0]))),
            "--config" => config_path = Some(PathBuf::from(value(&mut iter, arg, &args[0]))),
            "--no-includes" => no_includes = true,
            "--stdout" => to_stdout = true,
            "--help" | "-h" => {
                print_usage(&args[0]);
                process::exit(0);
            }
            other if other.starts_with('-') => {
                eprintln!("Unknown flag: {other}");
                print_usage(&args[0]);
                process::exit(1);
            }
            name => {
                if template.is_some() {
                    eprintln!("Unexpected argument: {name}");
                    print_usage(&args[0]);
                    process::exit(1);
                }
                template = Some(name.to_string());
            }
        }
    }

    let mut config = match &config_path {
        Some(path) => match CompileConfig::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error reading '{}': {e}", path.display());
                process::exit(1);
            }
        },
        None => CompileConfig::default(),
    };
    // Flags override the config file.
    if let Some(src) = src {
        config.source_root = src;
    }
    if let Some(dist) = dist {
        config.dist_root = dist;
    }
    if let Some(css) = css {
        config = config.with_stylesheet(css);
    }
    if no_includes {
        config = config.with_inline_includes(false);
    }

    let compiler = Compiler::new(config);

    match template {
        Some(name) => match compiler.compile_one(&name, !to_stdout) {
            Ok(output) => {
                if to_stdout {
                    print!("{}", output.html);
                } else {
                    eprintln!("Compiled '{}'", output.template_name);
                }
            }
            Err(e) => {
                eprintln!("Error compiling '{name}': {e}");
                process::exit(1);
            }
        },
        None => match compiler.compile_all() {
            Ok(report) => {
                println!("{}", report.to_json());
                if !report.is_success() {
                    process::exit(1);
                }
            }
            Err(e) => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        },
    }
}

fn value<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str, prog: &str) -> &'a str {
    match iter.next() {
        Some(v) => v,
        None => {
            eprintln!("Missing value for {flag}");
            print_usage(prog);
            process::exit(1);
        }
    }
}

fn print_usage(prog: &str) {
    eprintln!("forge – email template compiler (mail-forge)");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  {prog} [OPTIONS] [TEMPLATE]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  [TEMPLATE]       Template name to compile, e.g. emails/welcome (default: all)");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --src, -s DIR    Source templates directory (default: templates)");
    eprintln!("  --dist, -d DIR   Output directory (default: dist)");
    eprintln!("  --css, -c FILE   External stylesheet to inline");
    eprintln!("  --config FILE    JSON config file; flags override its values");
    eprintln!("  --no-includes    Leave {{% include %}} tags for the runtime renderer");
    eprintln!("  --stdout         Print a single compiled template instead of writing it");
    eprintln!("  --help           Print this message");
}
