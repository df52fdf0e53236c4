use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::error::{AppResult, BrowserError};

/// 连接到已开启调试端口的浏览器并获取门户页面
///
/// 优先复用地址中包含 `expected_domain` 的已有标签页（保留登录态），
/// 找不到时新建页面并打开 `listing_url`。
pub async fn connect_to_browser_and_page(
    port: u16,
    listing_url: Option<&str>,
    expected_domain: Option<&str>,
) -> AppResult<(Browser, Page)> {
    let browser_url = format!("http://localhost:{}", port);
    info!("正在连接到浏览器: {}", browser_url);
    debug!("列表页: {:?}, 期望域名: {:?}", listing_url, expected_domain);

    let (browser, mut handler) = Browser::connect(&browser_url).await.map_err(|e| {
        error!("连接浏览器失败: {}", e);
        BrowserError::ConnectionFailed {
            port,
            source: Box::new(e),
        }
    })?;
    debug!("浏览器连接成功");

    // 在后台处理浏览器事件
    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    // 添加短暂延迟以等待浏览器状态同步
    sleep(tokio::time::Duration::from_millis(300)).await;

    let pages = browser.pages().await?;
    debug!("获取到 {} 个页面", pages.len());

    if let Some(domain) = expected_domain.filter(|d| !d.is_empty()) {
        for p in pages.iter() {
            if let Ok(Some(url)) = p.url().await {
                debug!("检查页面地址: {}", url);
                if url.contains(domain) {
                    info!("✓ 复用已打开的门户页面: {}", url);
                    return Ok((browser, p.clone()));
                }
            }
        }
        debug!("未找到门户页面，将创建新页面");
    }

    let page = browser.new_page("about:blank").await.map_err(|e| {
        error!("创建新页面失败: {}", e);
        e
    })?;
    if let Some(url) = listing_url {
        page.goto(url).await.map_err(|e| {
            error!("导航到 {} 失败: {}", url, e);
            BrowserError::NavigationFailed {
                url: url.to_string(),
                source: Box::new(e),
            }
        })?;
        info!("已导航到: {}", url);
    }

    Ok((browser, page))
}
