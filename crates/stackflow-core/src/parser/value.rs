//! KDLノードからパラメータ値への変換
//!
//! - 引数1つ → スカラー
//! - 引数複数 → リスト
//! - プロパティのみ → オブジェクト
//! - 子ノードがすべて `-` → 各子ノードの値のリスト
//! - その他の子ノード → ネストしたオブジェクト

use kdl::{KdlEntry, KdlNode, KdlValue};
use serde_json::{Map, Number, Value};

pub(crate) fn kdl_value_to_json(value: &KdlValue) -> Result<Value, String> {
    if let Some(s) = value.as_string() {
        return Ok(Value::String(s.to_string()));
    }
    if let Some(i) = value.as_integer() {
        let n = i64::try_from(i).map_err(|_| format!("整数が範囲外です: {}", i))?;
        return Ok(Value::Number(n.into()));
    }
    if let Some(f) = value.as_float() {
        return Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(|| format!("数値として扱えません: {}", f));
    }
    if let Some(b) = value.as_bool() {
        return Ok(Value::Bool(b));
    }
    Ok(Value::Null)
}

/// 位置引数（名前なしエントリ）
pub(crate) fn arguments(node: &KdlNode) -> impl Iterator<Item = &KdlEntry> {
    node.entries().iter().filter(|e| e.name().is_none())
}

/// プロパティ（`key=value` エントリ）
pub(crate) fn properties(node: &KdlNode) -> impl Iterator<Item = (&str, &KdlEntry)> {
    node.entries()
        .iter()
        .filter_map(|e| e.name().map(|n| (n.value(), e)))
}

/// ノードをパラメータ値に変換
pub(crate) fn node_value(node: &KdlNode) -> Result<Value, String> {
    let name = node.name().value();
    let args = arguments(node)
        .map(|e| kdl_value_to_json(e.value()))
        .collect::<Result<Vec<_>, _>>()?;
    let mut props = Map::new();
    for (key, entry) in properties(node) {
        props.insert(key.to_string(), kdl_value_to_json(entry.value())?);
    }

    if let Some(children) = node.children() {
        if !args.is_empty() {
            return Err(format!(
                "'{}' に引数と子ノードを同時に指定することはできません",
                name
            ));
        }
        let items = children.nodes();
        if !items.is_empty() && items.iter().all(|c| c.name().value() == "-") {
            if !props.is_empty() {
                return Err(format!(
                    "'{}' はリストです。プロパティは `-` 要素に指定してください",
                    name
                ));
            }
            return items
                .iter()
                .map(node_value)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array);
        }
        for child in items {
            let key = child.name().value();
            if key == "-" {
                return Err(format!(
                    "'{}' の中で `-` 要素と名前付きノードを混在させることはできません",
                    name
                ));
            }
            if props.contains_key(key) {
                return Err(format!("'{}.{}' が重複しています", name, key));
            }
            props.insert(key.to_string(), node_value(child)?);
        }
        return Ok(Value::Object(props));
    }

    match (args.len(), props.is_empty()) {
        (0, true) => Err(format!("'{}' に値がありません", name)),
        (0, false) => Ok(Value::Object(props)),
        (1, true) => Ok(args.into_iter().next().unwrap_or(Value::Null)),
        (_, true) => Ok(Value::Array(args)),
        (_, false) => Err(format!(
            "'{}' に引数とプロパティを同時に指定することはできません",
            name
        )),
    }
}
