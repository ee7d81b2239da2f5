use std::sync::Arc;

use anyhow::Result;
use graphrelay_common::config::AppConfig;
use graphrelay_core::query::{FromEdgeConnectionQuery, NodeConnectionQuery, ToEdgeConnectionQuery};
use graphrelay_core::{
    CancellationToken, ConnectionArguments, Edge, GraphSchema, MemoryBackend, MutationOrchestrator, Node,
    NodeConnectionResult, PutRequest, QueryEvaluator, QueryNode, QueryTree, RetryPolicy,
};

fn friends_query(after: Option<String>) -> Result<QueryTree> {
    let mut args = ConnectionArguments::first(3);
    if let Some(after) = after {
        args = args.with_after(after);
    }
    let tree = QueryTree::new()
        .add_node(
            "people",
            QueryNode::NodeConnection(NodeConnectionQuery::new("Person", ConnectionArguments::first(2))),
        )?
        .add_parent_node(
            "people",
            "knows",
            QueryNode::InToEdgeConnection(ToEdgeConnectionQuery::new("Knows", ConnectionArguments::first(4))),
        )?
        .add_parent_node(
            "knows",
            "friends",
            QueryNode::OutFromEdgeConnection(FromEdgeConnectionQuery::new(args)),
        )?;
    Ok(tree)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    println!("🚀 Starting GraphRelay friends-of-friends example...");
    let config = AppConfig::load()?;
    let backend = Arc::new(MemoryBackend::new(
        GraphSchema::new()
            .with_node_type("Person", ["name"])
            .with_edge_type("Knows", ["since"]),
    ));

    // 1. Write a small social graph through the retrying write path
    let names = ["ada", "bob", "cy", "dee", "eve", "fay"];
    let nodes = names
        .iter()
        .map(|n| Node::new(*n, "Person").with_property("name", *n))
        .collect();
    let edges = vec![
        Edge::new("ada", "Knows", "cy"),
        Edge::new("ada", "Knows", "dee"),
        Edge::new("bob", "Knows", "eve"),
        Edge::new("bob", "Knows", "fay"),
        Edge::new("bob", "Knows", "ada"),
    ];
    let writer = MutationOrchestrator::new(RetryPolicy::from(&config.mutation));
    writer
        .put(backend.as_ref(), PutRequest { nodes, edges }, &CancellationToken::new())
        .await?;
    println!("📥 Stored {} people", names.len());

    // 2. Page through the people known by the first two people
    let evaluator = QueryEvaluator::new(backend.clone(), backend, &config);
    let mut after = None;
    for page in 1.. {
        let ctx = evaluator
            .evaluate(&friends_query(after.clone())?, &CancellationToken::new())
            .await?;
        let friends = ctx.get_result::<NodeConnectionResult>("friends")?;
        let ids: Vec<_> = friends.connection.items().map(|n| n.id.as_str()).collect();
        println!("📄 Page {}: {:?}", page, ids);

        if !friends.connection.page_info.has_next_page {
            break;
        }
        after = friends.connection.end_cursor().map(str::to_string);
    }

    println!("✅ Done.");
    Ok(())
}
