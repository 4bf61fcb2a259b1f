// Workspace integration tests: full harness runs of the builtin catalog
// against the reference hyper binding, over real loopback sockets.

#[cfg(test)]
mod common;

#[cfg(test)]
mod harness;
