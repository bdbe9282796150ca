//! Standard flows
//!
//! - `verilator_sim`: import (surelog) -> compile (verilator)
//! - `asicflow`: syn (yosys) -> floorplan -> place -> route -> export (openroad)
//!
//! Each flow comes as a graph plus the tool config a project needs to run it.

use crate::error::{LemonError, Result};
use crate::flow_graph::FlowGraph;
use crate::project::Project;
use crate::tool_config::{ToolConfig, OPTION_KEY, OUTPUT_KEY};

pub const VERILATOR_SIM: &str = "verilator_sim";
pub const ASICFLOW: &str = "asicflow";

/// Names accepted by [`by_name`]
pub const FLOWS: [&str; 2] = [VERILATOR_SIM, ASICFLOW];

/// Steps of `asicflow` after synthesis, all run by openroad
const PHYSICAL_STEPS: [&str; 4] = ["floorplan", "place", "route", "export"];

pub fn verilator_sim() -> Result<FlowGraph> {
    let mut graph = FlowGraph::new(VERILATOR_SIM)?;
    graph.add_step("import", "surelog")?;
    graph.add_step("compile", "verilator")?;
    graph.add_edge("import", "compile")?;
    Ok(graph)
}

/// Verilator gets the C++ dialect, the simulation include path and the
/// gtest link flags; manifest options are appended after them.
pub fn verilator_sim_config(project: &Project) -> Result<ToolConfig> {
    let mut config = ToolConfig::new(VERILATOR_SIM);
    let cflags = format!("-std=gnu++14 -I{}", project.sim_dir().display());
    config.set_option(
        "verilator",
        OPTION_KEY,
        ["-CFLAGS".to_string(), cflags, "-LDFLAGS".to_string(), "-lpthread -lgtest".to_string()],
    )?;
    config.extend_from(&project.options)?;
    Ok(config)
}

pub fn asicflow() -> Result<FlowGraph> {
    let mut graph = FlowGraph::new(ASICFLOW)?;
    graph.add_step("syn", "yosys")?;
    let mut prev = "syn";
    for step in PHYSICAL_STEPS {
        graph.add_step(step, "openroad")?;
        graph.add_edge(prev, step)?;
        prev = step;
    }
    Ok(graph)
}

/// Output declarations for synthesis and physical design. Every openroad
/// step leaves a DEF in its workdir; only `export` writes GDS.
pub fn asicflow_config(project: &Project) -> Result<ToolConfig> {
    let design = &project.design;
    let mut config = ToolConfig::new(ASICFLOW);
    config.set_option("yosys", OUTPUT_KEY, [format!("vg={}.vg", design)])?;
    config.set_option(
        "openroad",
        OUTPUT_KEY,
        [format!("def={}.def", design), format!("export:gds={}.gds", design)],
    )?;
    config.extend_from(&project.options)?;
    Ok(config)
}

/// Job flags carrying the synthesis settings into every asicflow step
pub fn asicflow_flags(target: &str, clock_period_ns: f64, clock_pin: &str) -> Vec<String> {
    vec![
        format!("--target={}", target),
        format!("--clock-period={}", clock_period_ns),
        format!("--clock-pin={}", clock_pin),
    ]
}

/// Look up a standard flow graph
pub fn by_name(name: &str) -> Result<FlowGraph> {
    match name {
        VERILATOR_SIM => verilator_sim(),
        ASICFLOW => asicflow(),
        _ => Err(LemonError::Config {
            reason: format!("unknown flow '{}' (available: {})", name, FLOWS.join(", ")),
        }),
    }
}
