//! MCP transport surface: exposes the Coordinator API to the manager
//! assistant as a tool belt, running over stdio (see `bin/chkd_mcp.rs`).

pub mod belt;
