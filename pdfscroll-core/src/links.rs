use tracing::{debug, warn};
use url::Url;

use crate::backend::DocumentBackend;
use crate::geometry::{PageTransform, Point, Rect};

/// A destination point carried by named or loosely typed links. `page` is
/// the page the point refers to, when the document records one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DestinationPoint {
    pub page: Option<usize>,
    pub y: f32,
}

/// What a link annotation points at. Points are in document space of the
/// target page.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkTarget {
    Goto {
        page: usize,
        point: Option<Point>,
    },
    Uri {
        uri: String,
    },
    /// A jump into another file; only reported, never followed.
    GotoRemote,
    NamedDestination {
        page: Option<usize>,
        point: Option<DestinationPoint>,
    },
    Unknown {
        page: Option<usize>,
        point: Option<DestinationPoint>,
    },
}

/// A link with its hot area in canvas space.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub page: usize,
    pub rect: Rect,
    pub target: LinkTarget,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkNotice {
    RemoteDocument,
    RejectedScheme { uri: String },
}

impl LinkNotice {
    pub fn message(&self) -> String {
        match self {
            LinkNotice::RemoteDocument => "Links to other documents are not supported".to_string(),
            LinkNotice::RejectedScheme { uri } => format!("Refusing to open link: {uri}"),
        }
    }
}

/// Outcome of following a link. `y` is a document-space offset within the
/// target page that should end up centred in the viewport.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkAction {
    GoToPage { page: usize, y: Option<f32> },
    OpenUri(String),
    Notify(LinkNotice),
    None,
}

/// Loads the page's link annotations and moves them into canvas space.
/// Extraction failures leave the page without links.
pub fn extract_links(
    backend: &dyn DocumentBackend,
    page: usize,
    transform: &PageTransform,
) -> Vec<Link> {
    match backend.page_links(page) {
        Ok(definitions) => {
            let links: Vec<Link> = definitions
                .into_iter()
                .map(|definition| Link {
                    page,
                    rect: transform.apply(&definition.rect),
                    target: definition.target,
                })
                .collect();
            debug!(page, count = links.len(), "extracted links");
            links
        }
        Err(err) => {
            warn!(?err, page, "link extraction failed");
            Vec::new()
        }
    }
}

pub fn link_at(links: &[Link], x: f32, y: f32) -> Option<&Link> {
    links.iter().find(|link| link.rect.contains(x, y))
}

pub fn resolve(link: &Link, page_count: usize, allowed_schemes: &[String]) -> LinkAction {
    match &link.target {
        LinkTarget::Goto { page, point } => {
            go_to(*page, point.map(|point| point.y), page_count)
        }
        LinkTarget::Uri { uri } => open_uri(uri, allowed_schemes),
        LinkTarget::GotoRemote => {
            debug!(page = link.page, "link to remote document");
            LinkAction::Notify(LinkNotice::RemoteDocument)
        }
        LinkTarget::NamedDestination { page, point } => resolve_loose(*page, *point, page_count),
        LinkTarget::Unknown { page, point } => resolve_loose(*page, *point, page_count),
    }
}

fn go_to(page: usize, y: Option<f32>, page_count: usize) -> LinkAction {
    if page >= page_count {
        warn!(page, page_count, "link target page out of range");
        return LinkAction::None;
    }
    LinkAction::GoToPage { page, y }
}

// The point's own page reference wins over the direct page field.
fn resolve_loose(
    page: Option<usize>,
    point: Option<DestinationPoint>,
    page_count: usize,
) -> LinkAction {
    let from_point = point.and_then(|point| point.page);
    match from_point.or(page) {
        Some(target) => go_to(target, point.map(|point| point.y), page_count),
        None => {
            warn!("could not resolve link destination");
            LinkAction::None
        }
    }
}

fn open_uri(uri: &str, allowed_schemes: &[String]) -> LinkAction {
    match Url::parse(uri) {
        Ok(url)
            if allowed_schemes
                .iter()
                .any(|scheme| scheme.eq_ignore_ascii_case(url.scheme())) =>
        {
            LinkAction::OpenUri(uri.to_string())
        }
        Ok(url) => {
            warn!(uri, scheme = url.scheme(), "rejected link scheme");
            LinkAction::Notify(LinkNotice::RejectedScheme {
                uri: uri.to_string(),
            })
        }
        Err(err) => {
            warn!(uri, %err, "unparseable link uri");
            LinkAction::Notify(LinkNotice::RejectedScheme {
                uri: uri.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LinkDefinition;
    use crate::test_support::{FakeBackend, FakePage};

    fn schemes() -> Vec<String> {
        crate::config::ViewerConfig::default().allowed_link_schemes
    }

    fn link(target: LinkTarget) -> Link {
        Link {
            page: 0,
            rect: Rect::new(0.0, 0.0, 10.0, 10.0),
            target,
        }
    }

    #[test]
    fn out_of_range_page_is_ignored() {
        let action = resolve(
            &link(LinkTarget::Goto {
                page: 500,
                point: None,
            }),
            10,
            &schemes(),
        );
        assert_eq!(action, LinkAction::None);
    }

    #[test]
    fn internal_link_carries_destination_point() {
        let action = resolve(
            &link(LinkTarget::Goto {
                page: 3,
                point: Some(Point::new(0.0, 120.0)),
            }),
            10,
            &schemes(),
        );
        assert_eq!(
            action,
            LinkAction::GoToPage {
                page: 3,
                y: Some(120.0)
            }
        );
    }

    #[test]
    fn uri_schemes_are_filtered() {
        let ok = resolve(
            &link(LinkTarget::Uri {
                uri: "https://example.com/manual".into(),
            }),
            1,
            &schemes(),
        );
        assert_eq!(ok, LinkAction::OpenUri("https://example.com/manual".into()));

        let mail = resolve(
            &link(LinkTarget::Uri {
                uri: "mailto:support@example.com".into(),
            }),
            1,
            &schemes(),
        );
        assert!(matches!(mail, LinkAction::OpenUri(_)));

        for bad in ["javascript:alert(1)", "file:///etc/passwd", "not a uri"] {
            let action = resolve(&link(LinkTarget::Uri { uri: bad.into() }), 1, &schemes());
            assert!(
                matches!(action, LinkAction::Notify(LinkNotice::RejectedScheme { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn remote_documents_only_notify() {
        let action = resolve(&link(LinkTarget::GotoRemote), 4, &schemes());
        assert_eq!(action, LinkAction::Notify(LinkNotice::RemoteDocument));
        assert_eq!(
            LinkNotice::RemoteDocument.message(),
            "Links to other documents are not supported"
        );
    }

    #[test]
    fn loose_destinations_prefer_point_page() {
        let named = resolve(
            &link(LinkTarget::NamedDestination {
                page: Some(1),
                point: Some(DestinationPoint {
                    page: Some(2),
                    y: 40.0,
                }),
            }),
            5,
            &schemes(),
        );
        assert_eq!(
            named,
            LinkAction::GoToPage {
                page: 2,
                y: Some(40.0)
            }
        );

        let direct = resolve(
            &link(LinkTarget::Unknown {
                page: Some(4),
                point: None,
            }),
            5,
            &schemes(),
        );
        assert_eq!(direct, LinkAction::GoToPage { page: 4, y: None });

        let lost = resolve(
            &link(LinkTarget::Unknown {
                page: None,
                point: None,
            }),
            5,
            &schemes(),
        );
        assert_eq!(lost, LinkAction::None);
    }

    #[test]
    fn extraction_transforms_and_tolerates_failure() {
        let mut page = FakePage::lines(&["see appendix"]);
        page.links.push(LinkDefinition {
            rect: Rect::new(10.0, 10.0, 30.0, 20.0),
            target: LinkTarget::Goto {
                page: 0,
                point: None,
            },
        });
        let mut backend = FakeBackend::new(vec![page.clone(), page]);
        backend.fail_links_on(1);
        let transform = PageTransform::new(2.0, 5.0, 100.0);

        let links = extract_links(&backend, 0, &transform);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].rect, Rect::new(25.0, 120.0, 65.0, 140.0));
        assert!(link_at(&links, 30.0, 130.0).is_some());
        assert!(link_at(&links, 70.0, 130.0).is_none());

        assert!(extract_links(&backend, 1, &transform).is_empty());
    }
}
