//! Shared builders for synthetic trace envelopes.
//!
//! Traces are written as `serde_json::Value` in the geth `callTracer` shape so
//! that every test also goes through the parser.

use std::time::{Duration, Instant};

use ethereum_types::Address;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::call_tree::{CallTreeBuilder, TransactionTrace};
use crate::config::AutopsyConfig;
use crate::findings::Finding;
use crate::pipeline::{AnalysisContext, Analyzer};
use crate::report::AnalysisResult;
use crate::selectors::{TRANSFER_TOPIC, selector_of};

pub const TX_HASH: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

/// Externally owned account that signs the transaction.
pub const EOA: u64 = 0xa1;
/// Attacker-controlled contract.
pub const ATTACK_CONTRACT: u64 = 0xa2;
pub const VICTIM: u64 = 0xb1;
pub const BYSTANDER: u64 = 0xb2;
pub const HELPER: u64 = 0xc1;

/// Mainnet WETH, allow-listed by default.
pub const WETH: &str = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";
/// Uniswap V2 WETH/USDC pair, allow-listed by default.
pub const UNIV2_PAIR: &str = "0xb4e16d0168e52d35cacd2c6185b44281ec28c9dc";

pub fn addr(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

pub fn known(raw: &str) -> Address {
    raw.parse().unwrap()
}

pub fn hex_addr(address: Address) -> String {
    format!("{address:#x}")
}

/// One ABI-encoded argument.
pub enum Arg {
    Address(Address),
    Amount(u64),
}

/// `selector(signature) ++ args`, hex encoded.
pub fn calldata(signature: &str, args: &[Arg]) -> String {
    let mut bytes = selector_of(signature).0.to_vec();
    for arg in args {
        let mut word = [0u8; 32];
        match arg {
            Arg::Address(a) => word[12..].copy_from_slice(a.as_bytes()),
            Arg::Amount(n) => word[24..].copy_from_slice(&n.to_be_bytes()),
        }
        bytes.extend_from_slice(&word);
    }
    format!("0x{}", hex::encode(bytes))
}

pub fn frame(kind: &str, from: Address, to: Address, value: u64, input: &str) -> Value {
    json!({
        "type": kind,
        "from": hex_addr(from),
        "to": hex_addr(to),
        "value": format!("{value:#x}"),
        "gasUsed": "0x5208",
        "input": input,
    })
}

pub fn call(from: Address, to: Address, value: u64, input: &str) -> Value {
    frame("CALL", from, to, value, input)
}

pub fn with_calls(mut frame: Value, calls: Vec<Value>) -> Value {
    frame["calls"] = Value::Array(calls);
    frame
}

pub fn with_logs(mut frame: Value, logs: Vec<Value>) -> Value {
    frame["logs"] = Value::Array(logs);
    frame
}

pub fn reverted(mut frame: Value, reason: &str) -> Value {
    frame["error"] = json!(reason);
    frame
}

fn topic(address: Address) -> String {
    format!("0x{:0>64}", hex::encode(address.as_bytes()))
}

/// ERC-20 `Transfer` log emitted by `token`.
pub fn transfer_log(token: Address, from: Address, to: Address, amount: u64) -> Value {
    json!({
        "address": hex_addr(token),
        "topics": [format!("{:#x}", *TRANSFER_TOPIC), topic(from), topic(to)],
        "data": format!("0x{amount:064x}"),
    })
}

pub fn envelope(root: Value) -> Value {
    json!({
        "hash": TX_HASH,
        "blockNumber": "0x112a880",
        "trace": root,
    })
}

pub fn build(envelope: Value) -> TransactionTrace {
    CallTreeBuilder::default().from_value(envelope).unwrap()
}

pub fn finding(contract: Address, function: &str, category: &str, severity: &str) -> Finding {
    Finding {
        contract_address: contract,
        function: function.parse().unwrap(),
        category: category.parse().unwrap(),
        severity: severity.parse().unwrap(),
        source_tool: "slither".to_string(),
        description: None,
    }
}

pub fn analyzer() -> Analyzer {
    Analyzer::new(AutopsyConfig::default()).unwrap()
}

pub fn live_ctx() -> AnalysisContext {
    AnalysisContext::new(Duration::from_secs(60), CancellationToken::new())
}

/// A context whose deadline has already passed.
pub fn expired_ctx() -> AnalysisContext {
    AnalysisContext::with_deadline(Instant::now(), CancellationToken::new())
}

pub fn analyze(envelope: Value, findings: &[Finding]) -> AnalysisResult {
    let trace = build(envelope);
    analyzer()
        .analyze_trace(&trace, findings, &live_ctx())
        .unwrap()
}

// ─── Reference transactions ─────────────────────────────────────────────

/// The deployer of a token mints to itself through an unguarded `mint`, with
/// an access-control finding on that function.
pub fn owner_mint() -> (Value, Vec<Finding>) {
    let attacker = addr(EOA);
    let token = addr(VICTIM);
    let root = with_logs(
        call(
            attacker,
            token,
            0,
            &calldata(
                "mint(address,uint256)",
                &[Arg::Address(attacker), Arg::Amount(1_000_000)],
            ),
        ),
        vec![transfer_log(token, Address::zero(), attacker, 1_000_000)],
    );
    let mut envelope = envelope(root);
    envelope["ownership"] = json!([{
        "contract": hex_addr(token),
        "owner": hex_addr(attacker),
        "relation": "deployer",
    }]);
    let findings = vec![finding(
        token,
        "mint(address,uint256)",
        "access-control",
        "High",
    )];
    (envelope, findings)
}

/// Classic ether reentrancy: the attack contract deposits 1 ether, then
/// re-enters `withdraw` from its receive hook and is paid twice.
pub fn reentrant_withdraw() -> (Value, Vec<Finding>) {
    let eoa = addr(EOA);
    let attack = addr(ATTACK_CONTRACT);
    let vault = addr(VICTIM);
    let withdraw = calldata("withdraw(uint256)", &[Arg::Amount(1)]);

    let inner = with_calls(
        call(attack, vault, 0, &withdraw),
        vec![call(vault, attack, 1, "0x")],
    );
    let hook = with_calls(call(vault, attack, 1, "0x"), vec![inner]);
    let outer = with_calls(call(attack, vault, 0, &withdraw), vec![hook]);
    let root = with_calls(
        call(eoa, attack, 0, &calldata("attack()", &[])),
        vec![call(attack, vault, 1, &calldata("deposit()", &[])), outer],
    );
    let findings = vec![finding(vault, "withdraw(uint256)", "reentrancy-eth", "High")];
    (envelope(root), findings)
}

/// A helper deployed with CREATE2 claims WETH and forwards it to the attack
/// contract. Nothing is flagged.
pub fn create2_relay() -> Value {
    let eoa = addr(EOA);
    let attack = addr(ATTACK_CONTRACT);
    let helper = addr(HELPER);
    let weth = known(WETH);

    let claim = with_logs(
        call(helper, weth, 0, &calldata("claim()", &[])),
        vec![transfer_log(weth, weth, helper, 5_000)],
    );
    let forward = with_logs(
        call(
            helper,
            weth,
            0,
            &calldata(
                "transfer(address,uint256)",
                &[Arg::Address(attack), Arg::Amount(5_000)],
            ),
        ),
        vec![transfer_log(weth, helper, attack, 5_000)],
    );
    let root = with_calls(
        call(eoa, attack, 0, &calldata("run()", &[])),
        vec![
            frame("CREATE2", attack, helper, 0, "0x6080"),
            with_calls(
                call(attack, helper, 0, &calldata("relay()", &[])),
                vec![claim, forward],
            ),
        ],
    );
    envelope(root)
}
