//! Native arithmetic functions.

use serde_json::{json, Value};

use crate::capabilities::{Capability, FunctionError, KernelArguments, ParameterSpec, Plugin};

/// `Add`, `Subtract`, `Multiply`, `Divide` and `Sqrt` over `number1`/`number2`.
///
/// Arguments may be numbers or numeric strings; results are floats.
#[derive(Debug, Clone, Copy, Default)]
pub struct MathPlugin;

fn binary(
    name: &str,
    description: &str,
    first: &str,
    second: &str,
    op: fn(f64, f64) -> Result<f64, FunctionError>,
) -> Capability {
    Capability::from_fn(name, description, move |args: &KernelArguments| {
        let result = op(args.get_f64("number1")?, args.get_f64("number2")?)?;
        Ok(json!(result))
    })
    .with_parameter(ParameterSpec::number("number1", first))
    .with_parameter(ParameterSpec::number("number2", second))
    .with_returns("the result as a float")
}

fn divide(a: f64, b: f64) -> Result<f64, FunctionError> {
    if b == 0.0 {
        return Err(FunctionError::InvalidArgument {
            name: "number2".to_string(),
            message: "division by zero".to_string(),
        });
    }
    Ok(a / b)
}

fn sqrt(args: &KernelArguments) -> Result<Value, FunctionError> {
    let n = args.get_f64("number1")?;
    if n < 0.0 {
        return Err(FunctionError::InvalidArgument {
            name: "number1".to_string(),
            message: format!("cannot take the square root of {}", n),
        });
    }
    Ok(json!(n.sqrt()))
}

impl Plugin for MathPlugin {
    fn functions(&self) -> Vec<Capability> {
        vec![
            binary(
                "Add",
                "Add two numbers.",
                "the first number to add",
                "the second number to add",
                |a, b| Ok(a + b),
            ),
            binary(
                "Subtract",
                "Subtract one number from another.",
                "the first number",
                "the number to subtract",
                |a, b| Ok(a - b),
            ),
            binary(
                "Multiply",
                "Multiply two numbers. When increasing by a percentage, don't forget to add 1 to the percentage.",
                "the first number to multiply",
                "the second number to multiply",
                |a, b| Ok(a * b),
            ),
            binary(
                "Divide",
                "Divide two numbers.",
                "the first number to divide from",
                "the number to divide by",
                divide,
            ),
            Capability::from_fn("Sqrt", "Takes the square root of a number", sqrt)
                .with_parameter(ParameterSpec::number("number1", "the number to take the square root of"))
                .with_returns("the result as a float"),
        ]
    }
}
