use std::path::PathBuf;

/// Terminal color behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

pub struct ParsedArgs {
    pub build_dir: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub configuration: Option<String>,
    pub ignore_system_headers: bool,
    pub extract_environment: bool,
    pub ignored_paths: Vec<String>,
    pub ignored_target_paths: Vec<String>,
    pub ignored_include_paths: Vec<String>,
    pub ruleset: Option<String>,
    pub compiler_args: Option<String>,
    pub project_dir: Option<PathBuf>,
    pub verbose: bool,
    pub color: ColorMode,
    pub show_help: bool,
    pub show_version: bool,
}

impl Default for ParsedArgs {
    fn default() -> Self {
        Self {
            build_dir: None,
            output_path: None,
            configuration: None,
            ignore_system_headers: false,
            extract_environment: false,
            ignored_paths: Vec::new(),
            ignored_target_paths: Vec::new(),
            ignored_include_paths: Vec::new(),
            ruleset: None,
            compiler_args: None,
            project_dir: None,
            verbose: false,
            color: ColorMode::Auto,
            show_help: false,
            show_version: false,
        }
    }
}

fn parse_color_mode(raw: &str) -> Result<ColorMode, String> {
    match raw {
        "auto" => Ok(ColorMode::Auto),
        "always" => Ok(ColorMode::Always),
        "never" => Ok(ColorMode::Never),
        _ => Err("--color expects auto|always|never".to_string()),
    }
}

/// Split a semicolon-delimited list, dropping empty segments.
pub fn parse_semicolon_list(raw: &str) -> Vec<String> {
    raw.split(';')
        .filter_map(|segment| {
            let trimmed = segment.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}

pub fn parse_args() -> Result<ParsedArgs, String> {
    let args: Vec<String> = std::env::args_os()
        .skip(1)
        .map(|s| s.to_string_lossy().into_owned())
        .collect();
    parse_arg_list(&args)
}

pub fn parse_arg_list(args: &[String]) -> Result<ParsedArgs, String> {
    let mut parsed = ParsedArgs::default();

    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];

        // Accept both `--flag value` and `--flag=value`.
        let (flag, inline_value) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
            _ => (arg.as_str(), None),
        };
        let mut consumed = 1;
        let mut value_of = |name: &str| -> Result<String, String> {
            match &inline_value {
                Some(value) => Ok(value.clone()),
                None => {
                    consumed = 2;
                    args.get(i + 1)
                        .cloned()
                        .ok_or_else(|| format!("{name} requires a value"))
                }
            }
        };

        match flag {
            "--help" | "-h" => parsed.show_help = true,
            "--version" | "-V" => parsed.show_version = true,
            "--verbose" | "-v" => parsed.verbose = true,
            "--ignore-system-headers" => parsed.ignore_system_headers = true,
            "--extract-environment" => parsed.extract_environment = true,
            "--build-dir" | "-b" => {
                parsed.build_dir = Some(PathBuf::from(value_of("--build-dir")?));
            }
            "--output" | "-o" => {
                parsed.output_path = Some(PathBuf::from(value_of("--output")?));
            }
            "--configuration" => {
                parsed.configuration = Some(value_of("--configuration")?);
            }
            "--ruleset" => {
                parsed.ruleset = Some(value_of("--ruleset")?);
            }
            "--compiler-args" => {
                parsed.compiler_args = Some(value_of("--compiler-args")?);
            }
            "--project-dir" => {
                parsed.project_dir = Some(PathBuf::from(value_of("--project-dir")?));
            }
            "--ignored-paths" => {
                parsed.ignored_paths = parse_semicolon_list(&value_of("--ignored-paths")?);
            }
            "--ignored-target-paths" => {
                parsed.ignored_target_paths =
                    parse_semicolon_list(&value_of("--ignored-target-paths")?);
            }
            "--ignored-include-paths" => {
                parsed.ignored_include_paths =
                    parse_semicolon_list(&value_of("--ignored-include-paths")?);
            }
            "--color" => {
                parsed.color = parse_color_mode(&value_of("--color")?)?;
            }
            _ if flag.starts_with('-') => {
                return Err(format!("unknown option: {flag}"));
            }
            _ => {
                if parsed.build_dir.is_some() {
                    return Err(format!("unexpected argument: {arg}"));
                }
                parsed.build_dir = Some(PathBuf::from(arg));
            }
        }
        i += consumed;
    }

    Ok(parsed)
}
