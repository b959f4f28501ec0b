//! Transactional unit of work

use futures::future::BoxFuture;

use crate::guard::{Guarded, run_guarded};
use crate::{Begin, Result, Transaction};

/// Run `block` inside a fresh transaction.
///
/// The block is the boundary for the abort signal: if it raises, the
/// transaction is rolled back and the block's error is returned. A failure of
/// the rollback itself is logged and dropped so that the first error wins.
/// If the block completes, the transaction is committed and a commit failure
/// is returned. A failure to begin is returned as is.
///
/// ```no_run
/// # use sqlguard_core::{Abort, Begin, Result, ops, values};
/// # async fn example(db: &dyn Begin) -> Result<()> {
/// sqlguard_core::run_in_transaction(db, |tx| {
///     Box::pin(async move {
///         ops::exec(tx, "INSERT INTO t (id) VALUES ($1)", &values![1_i64]).await?;
///         ops::exec(tx, "INSERT INTO t (id) VALUES ($1)", &values![2_i64]).await?;
///         Ok::<_, Abort>(())
///     })
/// })
/// .await
/// # }
/// ```
pub async fn run_in_transaction<B, T, F>(db: &B, block: F) -> Result<T>
where
    B: Begin + ?Sized,
    F: for<'t> FnOnce(&'t dyn Transaction) -> BoxFuture<'t, Guarded<T>>,
{
    let tx = db.begin_transaction().await?;

    let outcome = run_guarded(block(tx.as_ref())).await;

    match outcome {
        Ok(value) => {
            tx.commit().await?;
            tracing::debug!("transaction committed");
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(
                    error = %e,
                    rollback_error = %rollback_err,
                    "rollback failed after unit of work error"
                );
            } else {
                tracing::debug!(error = %e, "transaction rolled back");
            }
            Err(e)
        }
    }
}
