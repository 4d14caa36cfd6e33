//! 終了コード
//!
//! | コード | 意味 |
//! |---|---|
//! | 0 | 成功 |
//! | 1 | その他のエラー（IO、状態ファイル、設定、プロバイダー初期化） |
//! | 2 | グラフ定義エラー |
//! | 3 | 循環依存 |
//! | 4 | ドリフト検出（置き換えポリシーが fail） |
//! | 5 | プロビジョニング失敗 |
//! | 6 | 部分的に完了（再実行で再開可能） |

use stackflow_cloud::StackError;
use stackflow_core::DocumentError;

pub const SUCCESS: u8 = 0;
pub const FAILURE: u8 = 1;
pub const GRAPH: u8 = 2;
pub const CYCLE: u8 = 3;
pub const DRIFT: u8 = 4;
pub const PROVISION: u8 = 5;
pub const PARTIAL: u8 = 6;

pub fn for_stack_error(err: &StackError) -> u8 {
    match err {
        StackError::Graph(_) => GRAPH,
        StackError::Cycle(_) => CYCLE,
        StackError::Drift(_) => DRIFT,
        StackError::Provision(_) => PROVISION,
        StackError::PartialCompletion(_) => PARTIAL,
        StackError::State(_) => FAILURE,
    }
}

pub fn for_error(err: &anyhow::Error) -> u8 {
    if let Some(stack) = err.downcast_ref::<StackError>() {
        return for_stack_error(stack);
    }
    if let Some(DocumentError::Graph { .. }) = err.downcast_ref::<DocumentError>() {
        return GRAPH;
    }
    FAILURE
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackflow_cloud::{
        CloudError, CycleError, GraphError, Operation, PartialCompletionError, ProvisionError,
        ProvisionFailure, ResourceKind, StateError,
    };

    fn provision_error() -> StackError {
        ProvisionError {
            name: "web-asg".into(),
            kind: ResourceKind::AutoscalingGroup,
            operation: Operation::Create,
            attempts: 1,
            failure: ProvisionFailure::Api(CloudError::QuotaExceeded("instances".into())),
        }
        .into()
    }

    #[test]
    fn test_stack_error_codes() {
        let graph: StackError = GraphError::DuplicateName("vpc".into()).into();
        assert_eq!(for_stack_error(&graph), GRAPH);

        let cycle: StackError = CycleError {
            path: vec!["a".into(), "b".into(), "a".into()],
        }
        .into();
        assert_eq!(for_stack_error(&cycle), CYCLE);

        assert_eq!(for_stack_error(&provision_error()), PROVISION);

        let state: StackError = StateError::UnknownRecord("vpc".into()).into();
        assert_eq!(for_stack_error(&state), FAILURE);
    }

    #[test]
    fn test_partial_completion_has_its_own_code() {
        let partial: StackError = PartialCompletionError {
            completed: vec!["vpc".into()],
            pending: vec!["web-asg".into()],
            failed: Some("web-asg".into()),
            source: Some(Box::new(provision_error())),
        }
        .into();
        assert_eq!(for_stack_error(&partial), PARTIAL);
        assert_eq!(for_stack_error(partial.root_cause()), PROVISION);
    }

    #[test]
    fn test_anyhow_wrapping() {
        let err = anyhow::Error::from(provision_error());
        assert_eq!(for_error(&err), PROVISION);

        let err = anyhow::Error::from(DocumentError::Graph {
            path: "stack.kdl".into(),
            source: GraphError::DuplicateName("vpc".into()),
        });
        assert_eq!(for_error(&err), GRAPH);

        assert_eq!(for_error(&anyhow::anyhow!("リージョンが指定されていません")), FAILURE);
    }
}
