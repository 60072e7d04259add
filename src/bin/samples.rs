//! kernelflow sample runner.
//!
//! Each subcommand reproduces one sample: direct prompt invocation, a chat
//! loop, native math, goal planning, automatic function calling and the
//! Graph calendar plugin.
//!
//! # Environment Variables
//!
//! - `AZURE_OPENAI_ENDPOINT`, `AZURE_OPENAI_API_KEY`,
//!   `AZURE_OPENAI_CHAT_COMPLETION_MODEL`: required for every model call
//! - `AZURE_OPENAI_API_VERSION`: default `2024-02-15-preview`
//! - `GRAPH_ACCESS_TOKEN`, `GRAPH_BASE_URL`: `calendar` only
//! - `RUST_LOG`: tracing filter (default: "info,kernelflow=debug")
//!
//! A `.env` file in the working directory is loaded first.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin samples -- hello --name kuljot --age 18
//! cargo run --bin samples -- sequential --synthesize
//! cargo run --bin samples -- parallel
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use kernelflow::capabilities::KernelArguments;
use kernelflow::config::{AzureOpenAiSettings, GraphSettings, ProjectSettings};
use kernelflow::llms::{AzureChatCompletion, ChatCompletion, ChatHistory};
use kernelflow::planning::{AggregatedResult, ExecutionMode, Plan, StepOutcome};
use kernelflow::plugins::basic::CHAT_SYSTEM_PROMPT;
use kernelflow::plugins::{BasicPlugin, ChatPlugin, GraphPlugin, MathPlugin};
use kernelflow::{FunctionChoice, Kernel, KernelBuilder};

const PLAN_GOAL: &str = "generate contact information and greeting based on the following information: \n\
my name is kuljot and am 18 years old \n\
I live in New York and my contact number is 1234567890 \n\
my email id is sam@gmail.com";

const MIXED_QUERY: &str = "greet kuljot who is of age 19 and tell me how much is 10 divided by 2";

#[derive(Debug, Parser)]
#[command(name = "samples", version, about = "Run kernelflow samples")]
struct Args {
    /// Per-capability time limit in seconds
    #[arg(long, global = true, env = "KERNELFLOW_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Invoke the greeting prompt directly
    Hello {
        #[arg(long, default_value = "kuljot")]
        name: String,
        #[arg(long, default_value = "18")]
        age: String,
    },
    /// Invoke the contact_information prompt directly
    Contact {
        #[arg(long, default_value = "kuljot")]
        name: String,
        #[arg(long, default_value = "1234567890")]
        contact_number: String,
        #[arg(long, default_value = "hello@gmail.com")]
        email_id: String,
        #[arg(long, default_value = "1234, 5th Avenue, New York, NY 10001")]
        address: String,
    },
    /// Interactive chat; type `exit` to stop
    Chat,
    /// Invoke a native Math function
    Math {
        #[arg(long, default_value = "Sqrt")]
        function: String,
        #[arg(long, default_value_t = 4.0)]
        number1: f64,
        #[arg(long)]
        number2: Option<f64>,
    },
    /// Plan a goal over the prompt plugin and run it
    Plan {
        #[arg(long, default_value = PLAN_GOAL)]
        goal: String,
        /// Finish with one model call that summarizes the results
        #[arg(long)]
        synthesize: bool,
    },
    /// Plan a goal over the Math and prompt plugins and run it in order
    Sequential {
        #[arg(long, default_value = MIXED_QUERY)]
        goal: String,
        #[arg(long)]
        synthesize: bool,
    },
    /// Let the model call functions itself; calls of one round run concurrently
    Parallel {
        #[arg(long, default_value = MIXED_QUERY)]
        query: String,
    },
    /// Answer a question about the user's calendar events
    Calendar {
        #[arg(long, default_value = "list my calendar events")]
        query: String,
    },
    /// List every registered function
    Functions,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,kernelflow=debug".into()),
        )
        .init();

    let timeout = args.timeout_secs.map(Duration::from_secs);

    match args.command {
        Command::Hello { name, age } => {
            let kernel = prompt_kernel(timeout)?;
            let arguments = KernelArguments::new().with("name", name).with("age", age);
            let result = kernel.invoke("basic_plugin", "greeting", arguments).await?;
            println!("{}", result.text());
        }
        Command::Contact {
            name,
            contact_number,
            email_id,
            address,
        } => {
            let kernel = prompt_kernel(timeout)?;
            let arguments = KernelArguments::new()
                .with("name", name)
                .with("contact_number", contact_number)
                .with("email_id", email_id)
                .with("address", address);
            let result = kernel.invoke("basic_plugin", "contact_information", arguments).await?;
            println!("{}", result.text());
        }
        Command::Chat => run_chat(timeout).await?,
        Command::Math {
            function,
            number1,
            number2,
        } => {
            let kernel = builder(timeout).add_plugin("Math", &MathPlugin)?.build();
            let mut arguments = KernelArguments::new().with("number1", number1);
            if let Some(number2) = number2 {
                arguments.insert("number2", number2);
            }
            let result = kernel.invoke("Math", &function, arguments).await?;
            println!("{}", result.text());
        }
        Command::Plan { goal, synthesize } => {
            let kernel = prompt_kernel(timeout)?;
            print_functions(&kernel);
            run_plan(&kernel, &goal, synthesize).await?;
        }
        Command::Sequential { goal, synthesize } => {
            let kernel = mixed_kernel(timeout)?;
            run_plan(&kernel, &goal, synthesize).await?;
        }
        Command::Parallel { query } => {
            let kernel = mixed_kernel(timeout)?;
            let answer = kernel.invoke_prompt(&query, FunctionChoice::Auto).await?;
            println!("{}", answer);
        }
        Command::Calendar { query } => {
            let service = azure_service()?;
            let graph = GraphSettings::from_env().context("the calendar sample needs a Graph access token")?;
            let kernel = builder(timeout)
                .with_service(service.clone())
                .add_plugin("GraphPlugin", &GraphPlugin::from_settings(&graph, service))?
                .build();
            let arguments = KernelArguments::new().with("user_query", query);
            let result = kernel.invoke("GraphPlugin", "ListCalendarEvents", arguments).await?;
            println!("-----------------");
            println!("{}", result.text());
        }
        Command::Functions => {
            let service = azure_service()?;
            let kernel = builder(timeout)
                .with_service(service.clone())
                .add_plugin("MathPlugin", &MathPlugin)?
                .add_plugin("basic_plugin", &BasicPlugin::new(service.clone()))?
                .add_plugin("chat", &ChatPlugin::new(service))?
                .build();
            print_functions(&kernel);
            let project = ProjectSettings::from_env();
            if project.is_configured() {
                tracing::info!("AI project settings present (agent samples are not bundled)");
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Kernel assembly
// ---------------------------------------------------------------------------

fn azure_service() -> anyhow::Result<Arc<dyn ChatCompletion>> {
    let settings = AzureOpenAiSettings::from_env().context("Azure OpenAI is not configured")?;
    tracing::debug!("Using {:?}", settings);
    Ok(Arc::new(AzureChatCompletion::from_settings(&settings)))
}

fn builder(timeout: Option<Duration>) -> KernelBuilder {
    match timeout {
        Some(limit) => Kernel::builder().with_timeout(limit),
        None => Kernel::builder(),
    }
}

fn prompt_kernel(timeout: Option<Duration>) -> anyhow::Result<Kernel> {
    let service = azure_service()?;
    Ok(builder(timeout)
        .with_service(service.clone())
        .add_plugin("basic_plugin", &BasicPlugin::new(service))?
        .build())
}

fn mixed_kernel(timeout: Option<Duration>) -> anyhow::Result<Kernel> {
    let service = azure_service()?;
    Ok(builder(timeout)
        .with_service(service.clone())
        .add_plugin("MathPlugin", &MathPlugin)?
        .add_plugin("basic_plugin", &BasicPlugin::new(service))?
        .build())
}

// ---------------------------------------------------------------------------
// Samples
// ---------------------------------------------------------------------------

fn print_functions(kernel: &Kernel) {
    for capability in kernel.registry().list(None) {
        println!("Plugin: {}, Function: {}", capability.namespace(), capability.name());
    }
}

fn print_plan(plan: &Plan) {
    println!("The plan's steps are:");
    print!("{}", plan);
}

fn print_result(result: &AggregatedResult) {
    for report in &result.steps {
        if let StepOutcome::Failed(failure) = &report.outcome {
            eprintln!("step failed: {}", failure);
        }
    }
    if let Some(warning) = &result.synthesis_warning {
        eprintln!("warning: {}", warning);
    }
    match &result.answer {
        Some(answer) => println!("{}", answer),
        None => println!("{}", result.raw_results()),
    }
}

async fn run_plan(kernel: &Kernel, goal: &str, synthesize: bool) -> anyhow::Result<()> {
    let plan = kernel.create_plan(goal).await?;
    print_plan(&plan);

    let result = if synthesize {
        kernel.execute_plan_with_synthesis(plan, ExecutionMode::Sequential).await?
    } else {
        kernel.execute_plan(plan, ExecutionMode::Sequential).await?
    };
    print_result(&result);
    Ok(())
}

async fn run_chat(timeout: Option<Duration>) -> anyhow::Result<()> {
    let service = azure_service()?;
    let kernel = builder(timeout)
        .with_service(service.clone())
        .add_plugin("chat", &ChatPlugin::new(service))?
        .build();

    let mut history = ChatHistory::with_system_message(CHAT_SYSTEM_PROMPT);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        println!("type exit to end the chat session or your message to extend the conversation");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input == "exit" {
            break;
        }
        if input.is_empty() {
            continue;
        }

        let arguments = KernelArguments::new()
            .with("query", input)
            .with("chat_history", history.to_string());
        let response = kernel.invoke("chat", "AIChat", arguments).await?.text();
        println!("{}\n", response);

        history.add_user_message(input);
        history.add_assistant_message(response);
    }

    Ok(())
}
