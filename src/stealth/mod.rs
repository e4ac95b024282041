//! Fingerprint randomization and behavioral stealth.
//!
//! [`apply`] set up a page before first navigation: the override script is
//! registered for every new document, the user agent and Accept-Language are
//! overridden at the network layer, and the viewport is set to match the
//! claimed screen metrics. The pacing helpers in [`pacing`] are invoked by
//! the worker between navigation and extraction.

mod fingerprint;
pub mod pacing;

pub use fingerprint::Fingerprint;

use anyhow::Result;
use chromiumoxide::{Page, cdp};
use tracing::debug;

/// Install a fingerprint on a freshly created page.
///
/// Must run before the first real navigation; the override script only
/// affects documents created after registration.
pub async fn apply(page: &Page, fp: &Fingerprint) -> Result<()> {
    debug!(
        platform = %fp.platform,
        viewport = format!("{}x{}", fp.viewport_width, fp.viewport_height),
        "applying fingerprint"
    );

    page.execute(
        cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams {
            source: fp.override_script(),
            include_command_line_api: None,
            world_name: None,
            run_immediately: None,
        },
    )
    .await?;

    page.execute(cdp::browser_protocol::network::SetUserAgentOverrideParams {
        user_agent: fp.user_agent.clone(),
        accept_language: Some(fp.accept_language.clone()),
        platform: Some(fp.platform.clone()),
        user_agent_metadata: None,
    })
    .await?;

    page.execute(
        cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(fp.viewport_width))
            .height(i64::from(fp.viewport_height))
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(anyhow::Error::msg)?,
    )
    .await?;

    Ok(())
}
