use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use framejit::config::JitConfig;
use framejit::jit::hwreg::{GP_SAVED, GP_TEMP, VEC_SAVED, VEC_TEMP, X_DOUBLE_LIM, X_FRAME, X_RETURN, X_RUNTIME, X_SCRATCH};
use framejit::sim::{self, Machine};
use framejit::vm::{DATA_MASK, DOUBLE_LIM, Function, NUM_DATA_BITS, Tag, VALUE_FORMAT_VERSION, Value};
use framejit::{CompiledCode, compile};

#[derive(Parser)]
#[command(name = "framejit")]
#[command(about = "AArch64 baseline JIT for frame-register bytecode", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a function description (TOML, or JSON by extension)
    Compile {
        file: PathBuf,

        /// JIT configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print the annotated instruction listing
        #[arg(long)]
        dump: bool,

        /// Execute the compiled code in the simulator
        #[arg(long)]
        run: bool,

        /// Numeric argument passed to the function (repeatable)
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<f64>,

        /// Print statistics (and the result) as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print register partitions and value format constants
    Layout,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compile {
            file,
            config,
            dump,
            run,
            args,
            json,
        } => {
            if let Err(e) = compile_file(&file, config.as_deref(), dump, run, &args, json) {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        }
        Commands::Layout => print_layout(),
    }

    ExitCode::SUCCESS
}

fn load_function(path: &Path) -> Result<Function, String> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&source).map_err(|e| format!("{}: {}", path.display(), e))
    } else {
        toml::from_str(&source).map_err(|e| format!("{}: {}", path.display(), e))
    }
}

fn compile_file(
    path: &Path,
    config_path: Option<&Path>,
    dump: bool,
    run: bool,
    args: &[f64],
    json: bool,
) -> Result<(), String> {
    let mut config = match config_path {
        Some(p) => JitConfig::load(p).map_err(|e| e.to_string())?,
        None => JitConfig::default(),
    };
    config.dump_code |= dump;

    let func = load_function(path)?;
    let code = compile(&func, &sim::helper_table(), &config);

    let result = if run { Some(run_code(&code, args)?) } else { None };

    if json {
        let mut out = serde_json::json!({ "name": code.name, "stats": code.stats });
        if let Some(v) = result {
            out["result"] = serde_json::Value::String(v.to_string());
        }
        println!("{}", serde_json::to_string_pretty(&out).map_err(|e| e.to_string())?);
        return Ok(());
    }

    if let Some(listing) = &code.listing {
        print!("{}", listing);
    }
    let s = &code.stats;
    println!(
        "{}: {} ops, {} bytes code, {} bytes ro data, {} slow paths, {} thunks, frame {} bytes",
        code.name, s.ops, s.code_size, s.ro_data_size, s.slow_paths, s.thunks, s.frame_size
    );
    if let Some(v) = result {
        println!("result: {}", v);
    }
    Ok(())
}

fn run_code(code: &CompiledCode, args: &[f64]) -> Result<Value, String> {
    let mut machine = Machine::new().map_err(|e| e.to_string())?;
    let args: Vec<Value> = args.iter().map(|&n| Value::number(n)).collect();
    machine.run(code, &args).map_err(|e| e.to_string())
}

fn print_layout() {
    println!("value format v{}", VALUE_FORMAT_VERSION);
    println!("  data bits    {}", NUM_DATA_BITS);
    println!("  data mask    {:#018x}", DATA_MASK);
    println!("  double limit {:#018x}", DOUBLE_LIM);
    for tag in [
        Tag::Empty,
        Tag::Undefined,
        Tag::Null,
        Tag::Bool,
        Tag::Symbol,
        Tag::Str,
        Tag::Object,
    ] {
        println!("  {:<12} {:#06x}", format!("{:?}", tag), tag as u16);
    }
    println!("registers");
    println!("  frame        x{}", X_FRAME.code());
    println!("  runtime      x{}", X_RUNTIME.code());
    println!("  double limit x{}", X_DOUBLE_LIM.code());
    println!("  return       x{}", X_RETURN.code());
    println!("  scratch      x{}", X_SCRATCH.code());
    println!("  pinned gp    x{}..x{}", GP_SAVED.first, GP_SAVED.last);
    println!("  pinned vec   d{}..d{}", VEC_SAVED.first, VEC_SAVED.last);
    println!("  temp gp      x{}..x{}", GP_TEMP.first, GP_TEMP.last);
    println!("  temp vec     d{}..d{}", VEC_TEMP.first, VEC_TEMP.last);
}
