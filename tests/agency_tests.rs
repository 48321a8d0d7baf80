//! End-to-end tests for the agency façade.

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use agency::prelude::*;
use agency::tools::send_message_tool_name;
use common::{Behavior, ScriptedRunner};

fn ceo_dev(runner: ScriptedRunner) -> Agency {
    Agency::builder()
        .entry_agent(Agent::new("ceo").with_instructions("You coordinate."))
        .agent(Agent::new("dev").with_description("Writes code"))
        .edge("ceo", "dev")
        .runner(runner)
        .build()
        .unwrap()
}

#[tokio::test]
async fn delegation_records_both_sides_on_the_edge_thread() {
    let runner = ScriptedRunner::new()
        .on("ceo", Behavior::delegate("dev", "build X"))
        .on("dev", Behavior::reply("X is built"));
    let agency = ceo_dev(runner.clone());

    let output = agency.get_response("build X", "ceo", "conv1", None).await.unwrap();

    assert_eq!(output.final_output, "X is built");
    assert_eq!(output.agent, "ceo");

    let edge = ChannelKey::new("ceo", "dev");
    let thread = agency.thread_store().history("conv1", &edge, None);
    assert_eq!(thread.len(), 2);
    assert_eq!(thread[0].role, Role::User);
    assert_eq!(thread[0].content, "build X");
    assert_eq!(thread[1].role, Role::Assistant);
    assert_eq!(thread[1].content, "X is built");

    let entry = agency
        .thread_store()
        .history("conv1", &ChannelKey::external("ceo"), None);
    let types: Vec<ItemType> = entry.iter().map(|item| item.item_type).collect();
    assert_eq!(
        types,
        vec![ItemType::Message, ItemType::ToolCall, ItemType::ToolResult, ItemType::Message]
    );

    assert_eq!(output.new_items.len(), 6);
    assert_eq!(output.new_items[0].channel, ChannelKey::external("ceo"));
    assert_eq!(output.items_for(&edge).len(), 2);
    assert_eq!(runner.call_count(), 2);
}

#[tokio::test]
async fn non_entry_agent_is_rejected_before_anything_runs() {
    let runner = ScriptedRunner::new();
    let agency = ceo_dev(runner.clone());

    let err = agency.get_response("hi", "dev", "conv1", None).await.unwrap_err();

    assert!(matches!(err, AgencyError::InvalidEntryPoint { ref agent } if agent == "dev"));
    assert_eq!(err.kind(), ErrorKind::InvalidEntryPoint);
    assert_eq!(runner.call_count(), 0);
    assert!(agency.thread_store().conversation_ids().is_empty());
}

#[tokio::test]
async fn delegation_cycle_stops_at_the_default_depth() {
    let runner = ScriptedRunner::new()
        .on("a", Behavior::delegate("b", "your turn"))
        .on("b", Behavior::delegate("a", "your turn"));
    let agency = Agency::builder()
        .entry_agent(Agent::new("a"))
        .agent(Agent::new("b"))
        .flow("a > b")
        .flow("b > a")
        .runner(runner.clone())
        .build()
        .unwrap();

    let err = agency.get_response("start", "a", "loop", None).await.unwrap_err();

    assert!(matches!(err, AgencyError::RecursionLimit { depth: 26, max_depth: 25 }));
    // Entry run plus one run per permitted nesting level.
    assert_eq!(runner.call_count(), 26);
    let max_seen = runner.invocations().iter().map(|inv| inv.depth).max().unwrap();
    assert_eq!(max_seen, 25);

    let forward = agency
        .thread_store()
        .history("loop", &ChannelKey::new("a", "b"), None);
    assert!(forward.iter().all(|item| item.role == Role::User));
}

#[tokio::test]
async fn configured_depth_bounds_the_cycle() {
    let runner = ScriptedRunner::new()
        .on("a", Behavior::delegate("b", "ping"))
        .on("b", Behavior::delegate("a", "pong"));
    let agency = Agency::builder()
        .entry_agent(Agent::new("a"))
        .agent(Agent::new("b"))
        .edge("a", "b")
        .edge("b", "a")
        .config(AgencyConfig::default().with_max_depth(3))
        .runner(runner.clone())
        .build()
        .unwrap();

    let err = agency.get_response("go", "a", "conv", None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RecursionLimit);
    assert_eq!(runner.call_count(), 4);
}

#[tokio::test]
async fn channels_and_conversations_are_isolated() {
    let runner = ScriptedRunner::new()
        .on("ceo", Behavior::delegate("dev", "secret plan"))
        .on("dev", Behavior::reply("ack"))
        .on("qa", Behavior::reply("nothing to test"));
    let agency = Agency::builder()
        .entry_agent(Agent::new("ceo"))
        .agent(Agent::new("dev"))
        .agent(Agent::new("qa"))
        .edge("ceo", "dev")
        .edge("ceo", "qa")
        .runner(runner)
        .build()
        .unwrap();

    agency.get_response("go", "ceo", "conv1", None).await.unwrap();

    let store = agency.thread_store();
    assert_eq!(store.history("conv1", &ChannelKey::new("ceo", "dev"), None).len(), 2);
    assert!(store.history("conv1", &ChannelKey::new("ceo", "qa"), None).is_empty());
    assert!(store.history("conv2", &ChannelKey::new("ceo", "dev"), None).is_empty());
}

#[tokio::test]
async fn every_edge_gets_exactly_one_send_message_tool() {
    let agency = Agency::builder()
        .entry_agent(Agent::new("ceo"))
        .agent(Agent::new("dev"))
        .agent(Agent::new("QA Lead"))
        .flow("ceo > dev")
        .flow("ceo > QA Lead")
        .flow("dev > QA Lead")
        .runner(ScriptedRunner::new())
        .build()
        .unwrap();

    for edge in agency.graph().edges() {
        let sender = agency.agent(&edge.sender).unwrap();
        let name = send_message_tool_name(&edge.receiver);
        assert_eq!(
            sender.tool_names().iter().filter(|tool| **tool == name).count(),
            1,
            "{edge}"
        );
        assert!(sender.can_send_to(&edge.receiver));
    }

    let total: usize = agency
        .agents()
        .iter()
        .map(|agent| {
            agent
                .tool_names()
                .iter()
                .filter(|name| name.starts_with("send_message_to_"))
                .count()
        })
        .sum();
    assert_eq!(total, agency.graph().edges().len());
    assert!(agency.agent("QA Lead").unwrap().tools().is_empty());
    assert_eq!(
        agency.agent("dev").unwrap().tool_names(),
        vec!["send_message_to_qa_lead"]
    );
}

#[test]
fn invalid_graphs_fail_to_build() {
    let base = || {
        Agency::builder()
            .entry_agent(Agent::new("ceo"))
            .agent(Agent::new("dev"))
            .runner(ScriptedRunner::new())
    };

    let unknown = base().edge("ceo", "designer").build().unwrap_err();
    assert_eq!(unknown.kind(), ErrorKind::Configuration);

    let duplicate = base().edge("ceo", "dev").flow("ceo > dev").build().unwrap_err();
    assert!(duplicate.to_string().contains("more than once"));

    assert!(base().edge("dev", "dev").build().is_err());
    assert!(base().entry_point("cto").build().is_err());
    assert!(base().flow("ceo dev").build().is_err());
    assert!(base().agent(Agent::new("dev")).build().is_err());
    assert!(base().agent(Agent::new("user")).build().is_err());
    assert!(base().agent(Agent::new("a->b")).build().is_err());
    assert!(base().agent(Agent::new("qa ")).build().is_err());
    assert!(base().agent(Agent::new(" qa")).build().is_err());

    let no_runner = Agency::builder().entry_agent(Agent::new("ceo")).build().unwrap_err();
    assert!(no_runner.to_string().contains("runner"));

    let no_entry = Agency::builder()
        .agent(Agent::new("ceo"))
        .runner(ScriptedRunner::new())
        .build()
        .unwrap_err();
    assert_eq!(no_entry.kind(), ErrorKind::Configuration);

    let zero_depth = base()
        .config(AgencyConfig::default().with_max_depth(0))
        .build()
        .unwrap_err();
    assert_eq!(zero_depth.kind(), ErrorKind::Configuration);
}

#[test]
fn user_tool_named_like_send_message_collides() {
    let shadow = AgentTool::new(
        "send_message_to_dev",
        "not the real one",
        AgentToolParameters::empty(),
        |_args, _ctx| async { Ok(Value::Null) },
    );
    let err = Agency::builder()
        .entry_agent(Agent::new("ceo").with_tool(shadow))
        .agent(Agent::new("dev"))
        .edge("ceo", "dev")
        .runner(ScriptedRunner::new())
        .build()
        .unwrap_err();

    assert!(err.to_string().contains("collides"));
}

#[tokio::test]
async fn receiver_failure_comes_back_as_tool_error() {
    let runner = ScriptedRunner::new()
        .on("ceo", Behavior::delegate("dev", "build"))
        .on("dev", Behavior::Fail("model unavailable".to_string()));
    let agency = ceo_dev(runner);

    let output = agency.get_response("build", "ceo", "conv", None).await.unwrap();

    assert!(output.final_output.starts_with("I couldn't reach agent dev"));
    assert!(output.final_output.contains("model unavailable"));

    let edge = agency
        .thread_store()
        .history("conv", &ChannelKey::new("ceo", "dev"), None);
    assert_eq!(edge.len(), 1, "failed receiver must not append a reply");

    let entry = agency
        .thread_store()
        .history("conv", &ChannelKey::external("ceo"), None);
    assert!(entry.iter().any(|item| item.item_type == ItemType::ToolResult && item.is_error()));
}

#[tokio::test]
async fn escalated_kinds_abort_the_call() {
    let runner = ScriptedRunner::new()
        .on("ceo", Behavior::delegate("dev", "build"))
        .on("dev", Behavior::Fail("model unavailable".to_string()));
    let agency = Agency::builder()
        .entry_agent(Agent::new("ceo"))
        .agent(Agent::new("dev"))
        .edge("ceo", "dev")
        .config(AgencyConfig::default().with_escalation(EscalationPolicy::new([ErrorKind::Runner])))
        .runner(runner)
        .build()
        .unwrap();

    let err = agency.get_response("build", "ceo", "conv", None).await.unwrap_err();

    assert!(matches!(err, AgencyError::Runner { ref agent, .. } if agent == "dev"));
}

#[tokio::test]
async fn messaging_without_an_edge_is_refused() {
    let runner = ScriptedRunner::new()
        .on("ceo", Behavior::delegate("qa", "check this"))
        .on("qa", Behavior::reply("checked"));
    let agency = Agency::builder()
        .entry_agent(Agent::new("ceo"))
        .agent(Agent::new("qa"))
        .entry_point("qa")
        .runner(runner.clone())
        .build()
        .unwrap();

    let output = agency.get_response("go", "ceo", "conv", None).await.unwrap();

    assert!(output.final_output.contains("not found"));
    assert!(runner.invocations_of("qa").is_empty());
    assert!(agency.thread_store().channels("conv").iter().all(ChannelKey::is_external));
}

#[tokio::test]
async fn later_calls_see_earlier_turns() {
    let runner = ScriptedRunner::new().on("ceo", Behavior::reply("noted"));
    let agency = ceo_dev(runner.clone());

    agency.get_response("first", "ceo", "conv", None).await.unwrap();
    agency.get_response("second", "ceo", "conv", None).await.unwrap();

    let second = &runner.invocations()[1];
    let contents: Vec<&str> = second.history.iter().map(|item| item.content.as_str()).collect();
    assert_eq!(contents, vec!["first", "noted", "second"]);
    let sequences: Vec<u64> = second.history.iter().map(|item| item.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
}

#[tokio::test]
async fn history_limit_truncates_to_most_recent_items() {
    let runner = ScriptedRunner::new().on("ceo", Behavior::reply("ok"));
    let agency = Agency::builder()
        .entry_agent(Agent::new("ceo"))
        .config(AgencyConfig::default().with_history_limit(Some(2)))
        .runner(runner.clone())
        .build()
        .unwrap();

    agency.get_response("one", "ceo", "conv", None).await.unwrap();
    agency.get_response("two", "ceo", "conv", None).await.unwrap();

    let last = runner.invocations().pop().unwrap();
    let contents: Vec<&str> = last.history.iter().map(|item| item.content.as_str()).collect();
    assert_eq!(contents, vec!["ok", "two"]);
}

#[tokio::test]
async fn instructions_are_composed_for_each_run() {
    let runner = ScriptedRunner::new()
        .on("ceo", Behavior::delegate("dev", "go"))
        .on("dev", Behavior::reply("done"));
    let agency = Agency::builder()
        .entry_agent(Agent::new("ceo").with_instructions("You coordinate."))
        .agent(Agent::new("dev").with_instructions("You write code."))
        .edge("ceo", "dev")
        .shared_instructions("Company policy.")
        .runner(runner.clone())
        .build()
        .unwrap();

    let options = RunOptions::builder()
        .additional_instructions("Answer in French.")
        .build();
    agency.get_response("go", "ceo", "conv", Some(options)).await.unwrap();

    let ceo = &runner.invocations_of("ceo")[0];
    assert_eq!(ceo.instructions, "Company policy.\n\nYou coordinate.\n\nAnswer in French.");
    assert_eq!(ceo.tools, vec!["send_message_to_dev"]);
    let dev = &runner.invocations_of("dev")[0];
    assert_eq!(dev.instructions, "Company policy.\n\nYou write code.");
    assert_eq!(dev.channel, ChannelKey::new("ceo", "dev"));
    assert_eq!(dev.depth, 1);
}

#[tokio::test]
async fn shared_context_is_visible_across_the_call_tree() {
    let runner = FnRunner::new(|request: RunRequest| async move {
        match request.agent_name() {
            "ceo" => {
                let call = ToolCall::new(
                    "c1",
                    "send_message_to_dev",
                    json!({ "message": "plan", "additional_instructions": "be quick" }),
                );
                request.execute_tool(&call).await?;
                let note = request.context.get_or("note", "missing");
                Ok(RunOutput::text(note.as_str().unwrap_or_default()))
            }
            _ => {
                let budget = request.context.get("budget").unwrap_or(Value::Null);
                request.context.set("note", format!("dev saw budget {budget}"));
                assert!(request.instructions.ends_with("be quick"));
                Ok(RunOutput::text("ok"))
            }
        }
    });
    let agency = Agency::builder()
        .entry_agent(Agent::new("ceo"))
        .agent(Agent::new("dev"))
        .edge("ceo", "dev")
        .runner(runner)
        .build()
        .unwrap();

    let options = RunOptions::builder()
        .context([("budget".to_string(), json!(100))].into_iter().collect())
        .build();
    let output = agency.get_response("go", "ceo", "conv", Some(options)).await.unwrap();

    assert_eq!(output.final_output, "dev saw budget 100");
}

#[tokio::test]
async fn calls_on_one_conversation_do_not_interleave() {
    let runner = ScriptedRunner::new().on(
        "ceo",
        Behavior::Slow {
            delay: Duration::from_millis(20),
            reply: "done".to_string(),
        },
    );
    let agency = ceo_dev(runner);

    let (first, second) = tokio::join!(
        agency.get_response("one", "ceo", "conv", None),
        agency.get_response("two", "ceo", "conv", None),
    );
    first.unwrap();
    second.unwrap();

    let roles: Vec<Role> = agency
        .thread_store()
        .history("conv", &ChannelKey::external("ceo"), None)
        .iter()
        .map(|item| item.role)
        .collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
}

#[tokio::test(start_paused = true)]
async fn clearing_a_conversation_keeps_calls_serialized() {
    let runner = ScriptedRunner::new().on(
        "ceo",
        Behavior::Slow {
            delay: Duration::from_secs(10),
            reply: "done".to_string(),
        },
    );
    let agency = ceo_dev(runner.clone());

    let first = tokio::spawn({
        let agency = agency.clone();
        async move { agency.get_response("one", "ceo", "conv", None).await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(agency.thread_store().clear_conversation("conv"));

    let second = tokio::spawn({
        let agency = agency.clone();
        async move { agency.get_response("two", "ceo", "conv", None).await }
    });
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(runner.call_count(), 1);

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    assert_eq!(runner.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_the_run_without_partial_items() {
    let runner = ScriptedRunner::new().on(
        "ceo",
        Behavior::Slow {
            delay: Duration::from_secs(60),
            reply: "too late".to_string(),
        },
    );
    let agency = ceo_dev(runner);
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let options = RunOptions::builder().cancellation(token).build();
    let err = agency
        .get_response("slow", "ceo", "conv", Some(options))
        .await
        .unwrap_err();

    assert!(matches!(err, AgencyError::Canceled));
    let items = agency
        .thread_store()
        .history("conv", &ChannelKey::external("ceo"), None);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].role, Role::User);

    // The conversation lock was released.
    let _guard = agency.thread_store().lock_conversation("conv").await;
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let agency = ceo_dev(ScriptedRunner::new());
    let err = agency.get_response("   ", "ceo", "conv", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(agency.thread_store().conversation_ids().is_empty());
}
