use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use gemm_rs::catalog::format::{sibling_path, CatalogFile};
use gemm_rs::config::{CatalogEncoding, DEFAULT_CATALOG_NAME};

fn main() {
    if let Err(err) = run(env::args().skip(1).collect()) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run(raw_args: Vec<String>) -> Result<(), String> {
    let mut args = raw_args.into_iter();
    let Some(cmd) = args.next() else {
        print_help();
        return Ok(());
    };

    match cmd.as_str() {
        "--help" | "-h" | "help" => {
            print_help();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("catalogtool {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "inspect" => run_inspect(args.collect()),
        "convert" => run_convert(args.collect()),
        "split" => run_split(args.collect()),
        other => Err(format!("unknown command '{other}'")),
    }
}

/// Values of `--flag value` pairs; every flag must be in `known`.
fn parse_flags(raw_args: &[String], known: &[&str]) -> Result<BTreeMap<String, String>, String> {
    let mut flags = BTreeMap::new();
    let mut i = 0usize;
    while i < raw_args.len() {
        let flag = raw_args[i].as_str();
        if !known.contains(&flag) {
            return Err(format!("unknown flag '{flag}'"));
        }
        i += 1;
        let value = raw_args
            .get(i)
            .ok_or_else(|| format!("flag '{flag}' needs a value"))?;
        flags.insert(flag.to_string(), value.clone());
        i += 1;
    }
    Ok(flags)
}

fn required(flags: &BTreeMap<String, String>, flag: &str) -> Result<PathBuf, String> {
    flags
        .get(flag)
        .map(PathBuf::from)
        .ok_or_else(|| format!("missing required {flag}"))
}

fn load(path: &Path) -> Result<CatalogFile, String> {
    CatalogFile::load(path).map_err(|e| format!("failed to load {}: {e}", path.display()))
}

fn save(file: &CatalogFile, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create output dir {}: {e}", parent.display()))?;
    }
    file.save(path)
        .map_err(|e| format!("failed to write {}: {e}", path.display()))
}

fn run_inspect(raw_args: Vec<String>) -> Result<(), String> {
    let Some(input) = raw_args.first().map(PathBuf::from) else {
        return Err("inspect requires input path".to_string());
    };
    let file = load(&input)?;
    print!("{}", describe(&input, &file));
    Ok(())
}

fn describe(path: &Path, file: &CatalogFile) -> String {
    let mut out = String::new();
    out.push_str(&format!("input={}\n", path.display()));
    out.push_str(&format!("version={}\n", file.version));
    out.push_str(&format!("architecture={}\n", file.architecture));
    out.push_str(&format!(
        "layout={}\n",
        if file.is_lazy() { "lazy" } else { "eager" }
    ));
    out.push_str(&format!("solutions={}\n", file.solutions.len()));

    let mut signatures: BTreeMap<String, usize> = BTreeMap::new();
    for record in &file.solutions {
        let key = format!(
            "{}_{}{}",
            record.types.tag(),
            record.trans_a.as_char(),
            record.trans_b.as_char()
        );
        *signatures.entry(key).or_default() += 1;
    }
    for (signature, count) in signatures {
        out.push_str(&format!("  {signature}={count}\n"));
    }

    out.push_str(&format!("placeholders={}\n", file.placeholders.len()));
    for placeholder in &file.placeholders {
        let present = sibling_path(path, &placeholder.group).is_file();
        out.push_str(&format!(
            "  {} {}{} -> {}{}\n",
            placeholder.types.tag(),
            placeholder.trans_a.as_char(),
            placeholder.trans_b.as_char(),
            placeholder.group,
            if present { "" } else { " (missing)" }
        ));
    }
    out
}

fn run_convert(raw_args: Vec<String>) -> Result<(), String> {
    let flags = parse_flags(&raw_args, &["--in", "--out"])?;
    let input = required(&flags, "--in")?;
    let output = required(&flags, "--out")?;
    if CatalogEncoding::from_path(&output).is_none() {
        return Err(format!(
            "output {} must end in .dat or .json",
            output.display()
        ));
    }

    let file = load(&input)?;
    save(&file, &output)?;
    println!("converted {} -> {}", input.display(), output.display());
    Ok(())
}

fn run_split(raw_args: Vec<String>) -> Result<(), String> {
    let flags = parse_flags(&raw_args, &["--in", "--out-dir", "--name", "--encoding"])?;
    let input = required(&flags, "--in")?;
    let out_dir = required(&flags, "--out-dir")?;
    let name = flags
        .get("--name")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CATALOG_NAME);
    let encoding = match flags.get("--encoding").map(String::as_str) {
        None => CatalogEncoding::from_path(&input).unwrap_or_default(),
        Some("json") => CatalogEncoding::Json,
        Some("dat") | Some("binary") => CatalogEncoding::Binary,
        Some(other) => return Err(format!("unknown encoding '{other}'")),
    };

    let file = load(&input)?;
    if file.solutions.is_empty() {
        return Err(format!("{} lists no solutions to split", input.display()));
    }
    let (manifest, groups) = file.split_into_groups(name);
    let ext = encoding.extension();
    for (stem, group) in &groups {
        save(group, &out_dir.join(format!("{stem}.{ext}")))?;
    }
    let manifest_path = out_dir.join(format!("{name}_lazy_{}.{ext}", file.architecture));
    save(&manifest, &manifest_path)?;

    println!(
        "split {} solutions into {} groups",
        file.solutions.len(),
        groups.len()
    );
    println!("manifest {}", manifest_path.display());
    Ok(())
}

fn print_help() {
    println!("catalogtool {}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  catalogtool inspect <catalog.{{dat,json}}>");
    println!("  catalogtool convert --in <catalog> --out <catalog>");
    println!("  catalogtool split --in <eager catalog> --out-dir <dir> [--name GemmLibrary] [--encoding dat|json]");
    println!("  catalogtool version");
}
