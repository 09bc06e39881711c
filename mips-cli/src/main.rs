use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use mips_compiler::sim::{Machine, DEFAULT_DMEM_WORDS};
use mips_compiler::{compile_sources, CompileConfig, Compilation, Location};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mipsc")]
#[command(about = "A compiler from a small C dialect to a MIPS-like ISA")]
struct Args {
    /// Source files, compiled in order as one translation unit
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Write the output here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Asm)]
    format: Format,

    /// Execute the program on the interpreter and report the result
    #[arg(long)]
    run: bool,

    /// Step bound for --run
    #[arg(long, default_value_t = 1_000_000)]
    max_steps: usize,

    /// Data memory size in words for --run
    #[arg(long, default_value_t = DEFAULT_DMEM_WORDS)]
    dmem_words: usize,

    /// Top-level variables to report after --run (comma separated)
    #[arg(long, value_delimiter = ',')]
    show: Vec<String>,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,

    /// JSON file with compiler settings; explicit flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Initial stack pointer
    #[arg(long)]
    stack_top: Option<i32>,

    /// Skip the peephole passes
    #[arg(long)]
    no_optimize: bool,

    /// Check register tracker consistency after every statement
    #[arg(long)]
    verify_allocator: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Format {
    /// Textual assembly
    Asm,
    /// One 32-bit binary word per line
    Mem,
}

#[derive(Serialize)]
struct RunReport {
    steps: usize,
    variables: Vec<VariableReport>,
    log: Vec<i32>,
}

#[derive(Serialize)]
struct VariableReport {
    name: String,
    location: Option<Location>,
    value: Option<i32>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;

    let mut sources = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading '{}'", path.display()))?;
        sources.push(text);
    }
    let compilation = compile_sources(&sources, &config)?;
    log::info!("compiled {} instructions", compilation.program.len());

    let rendered = match args.format {
        Format::Asm => compilation.program.to_asm_text(),
        Format::Mem => compilation.program.to_mem_image()?,
    };
    match &args.output {
        Some(path) => fs::write(path, &rendered)
            .with_context(|| format!("writing '{}'", path.display()))?,
        None if !args.run => print!("{rendered}"),
        None => {}
    }

    if args.run {
        let report = execute(&compilation, &args)?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report);
        }
    }
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<CompileConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config '{}'", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing config '{}'", path.display()))?
        }
        None => CompileConfig::default(),
    };
    if let Some(top) = args.stack_top {
        config.stack_top = top;
    }
    if args.no_optimize {
        config.optimize = false;
    }
    if args.verify_allocator {
        config.verify_allocator = true;
    }
    if config.stack_top < 0 || (args.run && config.stack_top as usize >= args.dmem_words) {
        bail!(
            "stack top {} is outside {} words of data memory",
            config.stack_top,
            args.dmem_words
        );
    }
    Ok(config)
}

fn execute(compilation: &Compilation, args: &Args) -> anyhow::Result<RunReport> {
    let mut machine = Machine::new(args.dmem_words);
    let steps = machine.run(&compilation.program, args.max_steps)?;
    if steps >= args.max_steps {
        log::warn!("stopped after {steps} steps without reaching the end of the program");
    }
    let variables = args
        .show
        .iter()
        .map(|name| VariableReport {
            name: name.clone(),
            location: compilation.location(name),
            value: compilation.value_of(&machine, name),
        })
        .collect();
    Ok(RunReport {
        steps,
        variables,
        log: machine.log().to_vec(),
    })
}

fn print_report(report: &RunReport) {
    println!("steps: {}", report.steps);
    for var in &report.variables {
        match (var.location, var.value) {
            (Some(Location::Register(reg)), Some(value)) => {
                println!("{} = {value} ({reg})", var.name)
            }
            (Some(Location::Memory(address)), Some(value)) => {
                println!("{} = {value} (mem[{address}])", var.name)
            }
            _ => println!("{}: not a top-level variable", var.name),
        }
    }
    if !report.log.is_empty() {
        let log: Vec<String> = report.log.iter().map(i32::to_string).collect();
        println!("log: {}", log.join(" "));
    }
}
