use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use clap::{ArgAction, Parser};
use colored::*;
use tracing_subscriber::filter::EnvFilter;

use otter_testcase::{Reporter, RunnerConfig, Step, StepContext, TestCase, TestError, TestReport};

#[derive(Parser, Debug)]
#[command(name = "testcase-selfcheck")]
#[command(about = "Run the built-in lifecycle self-check case and verify every outcome")]
struct Args {
    /// Path to config file (defaults to ./otter_testcase.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Per-test budget in milliseconds (overrides config)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Only run tests whose name contains this pattern
    #[arg(short, long)]
    filter: Option<String>,

    /// Output the summary as JSON
    #[arg(long)]
    json: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Only list tests without running them
    #[arg(long)]
    list_only: bool,

    /// Save the JSON summary to this file
    #[arg(long)]
    save: Option<PathBuf>,

    /// Verbosity: -v info, -vv debug, -vvv trace
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

/// Shared state of the self-check case.
#[derive(Default)]
struct SelfCheck {
    set_up_suite: AtomicUsize,
    tear_down_suite: AtomicUsize,
    tear_down: AtomicUsize,
}

type Cx = StepContext<SelfCheck>;

/// Budget used by the self-check when neither flag nor config sets one.
const SELFCHECK_TIMEOUT_MS: u64 = 200;

fn self_check_case() -> (TestCase<SelfCheck>, HashMap<&'static str, bool>) {
    let expected = HashMap::from([
        ("testPasses", true),
        ("testFailsAssertion", false),
        ("testPanics", false),
        ("testCallbackStyle", true),
        ("testLateFailureDropped", true),
        ("testUnaffectedByLateFailure", true),
        ("testUncaughtFailure", false),
        ("testTimesOut", false),
    ]);

    let case = TestCase::new(SelfCheck::default())
        .set_up_suite(Step::from_fn(|cx: &Cx| {
            cx.set_up_suite.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .tear_down_suite(Step::from_fn(|cx: &Cx| {
            cx.tear_down_suite.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .tear_down(Step::from_fn(|cx: &Cx| {
            cx.tear_down.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .value("testFixtureName", "not a test")
        .method("testPasses", Step::from_fn(|_: &Cx| Ok(())))
        .method(
            "testFailsAssertion",
            Step::from_fn(|_: &Cx| Err(TestError::msg("expected 2, got 3"))),
        )
        .method(
            "testPanics",
            Step::from_fn(|_: &Cx| panic!("index out of bounds")),
        )
        .method(
            "testCallbackStyle",
            Step::from_callback(|_: Cx, done| {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    done.ok();
                });
            }),
        )
        .method(
            "testLateFailureDropped",
            Step::from_fn(|cx: &Cx| {
                cx.boundary().spawn(async {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Err(TestError::msg("late failure after the test settled"))
                });
                Ok(())
            }),
        )
        .method(
            "testUnaffectedByLateFailure",
            Step::from_async(|_: Cx| async {
                tokio::time::sleep(Duration::from_millis(60)).await;
                Ok::<_, TestError>(())
            }),
        )
        .method(
            "testUncaughtFailure",
            Step::from_async(|cx: Cx| async move {
                cx.boundary()
                    .spawn(async { Err(TestError::msg("detached work failed")) });
                futures::future::pending::<()>().await;
                Ok::<_, TestError>(())
            }),
        )
        .method(
            "testTimesOut",
            Step::from_async(|_: Cx| futures::future::pending()),
        );

    (case, expected)
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    // Steps share one cooperative scheduler, like the host loop they model.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to create tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> ExitCode {
    let mut config = RunnerConfig::load_or_default(args.config.as_deref());
    if args.config.is_none() && config == RunnerConfig::default() {
        config.default_timeout_ms = SELFCHECK_TIMEOUT_MS;
    }
    if let Some(ms) = args.timeout_ms {
        config.default_timeout_ms = ms;
    }
    if args.filter.is_some() {
        config.filter = args.filter.clone();
    }
    config.json |= args.json;
    config.color &= !args.no_color;
    if !config.color {
        colored::control::set_override(false);
    }

    let (case, expected) = self_check_case();
    let case = case.with_config(&config);
    let mut run = match case.assemble() {
        Ok(run) => run,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            return ExitCode::from(2);
        }
    };

    if args.list_only {
        for name in run.list() {
            println!("{}", name);
        }
        println!("\nTotal: {} tests", run.len());
        return ExitCode::SUCCESS;
    }

    if !config.json {
        println!("{}", "Otter Test Case Self-Check".bold().cyan());
        println!("Budget per test: {}ms", config.default_timeout_ms);
        println!();
    }

    run.run().await;

    let report = TestReport::from_run(&run);
    if config.json {
        match report.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to generate JSON: {}", e),
        }
    } else {
        let mut reporter = Reporter::new(std::io::stdout().lock()).with_color(config.color);
        if let Err(e) = reporter.report(&run) {
            eprintln!("Failed to write report: {}", e);
        }
        report.print_summary();
    }

    if let Some(path) = &args.save {
        match report.save(path) {
            Ok(()) => eprintln!("Results saved to {}", path.display()),
            Err(e) => eprintln!("Failed to save results: {}", e),
        }
    }

    // Self-check: every outcome matches what the lifecycle guarantees.
    let mut mismatches = Vec::new();
    for (name, result) in run.results() {
        let passed = result.map(|r| r.passed());
        if passed != expected.get(name).copied() {
            mismatches.push(format!("{name}: expected {:?}, got {:?}", expected.get(name), passed));
        }
    }
    let context = case.context();
    let ran = run.results().filter(|(_, r)| r.is_some()).count();
    let tear_downs = context.tear_down.load(Ordering::SeqCst);
    if tear_downs != ran {
        mismatches.push(format!("tearDown ran {tear_downs} times for {ran} tests"));
    }
    if !run.is_empty() {
        for (hook, count) in [
            ("setUpSuite", context.set_up_suite.load(Ordering::SeqCst)),
            ("tearDownSuite", context.tear_down_suite.load(Ordering::SeqCst)),
        ] {
            if count != 1 {
                mismatches.push(format!("{hook} ran {count} times"));
            }
        }
    }

    if mismatches.is_empty() {
        if !config.json {
            println!("\n{}", "Self-check passed".green().bold());
        }
        ExitCode::SUCCESS
    } else {
        eprintln!("\n{}", "Self-check failed".red().bold());
        for mismatch in &mismatches {
            eprintln!("  {}", mismatch);
        }
        ExitCode::FAILURE
    }
}
