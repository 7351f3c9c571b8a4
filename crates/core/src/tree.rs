//! Generic tree fold shared by the result-tree builder and flattener.
//!
//! Result trees have no depth limit in the data model, so the fold keeps its own stack instead
//! of recursing.

/// An owned tree node.
#[derive(Clone, Debug, PartialEq)]
pub struct Node<T> {
    pub value: T,
    pub children: Vec<Node<T>>,
}

impl<T> Node<T> {
    /// Transform every value bottom-up. `f` receives the value, whether the node is a leaf,
    /// and its depth (root = 0).
    pub fn try_map<U, E>(
        self,
        mut f: impl FnMut(T, bool, usize) -> Result<U, E>,
    ) -> Result<Node<U>, E> {
        fold_tree(
            self,
            |node, _| Ok(std::mem::take(&mut node.children)),
            |node, children, depth| {
                let is_leaf = children.is_empty();
                Ok(Node {
                    value: f(node.value, is_leaf, depth)?,
                    children,
                })
            },
        )
    }
}

struct Frame<N, T> {
    node: N,
    pending: Vec<N>,
    built: Vec<T>,
    depth: usize,
}

/// Post-order fold over a tree described by a `children` function.
///
/// `children` is called once per node, parent before child, and may take the children out of
/// the node. `build` is called once per node after all of its children were built, with their
/// results in order. Both receive the node depth (root = 0). The first error stops the fold.
pub fn fold_tree<N, T, E>(
    mut root: N,
    mut children: impl FnMut(&mut N, usize) -> Result<Vec<N>, E>,
    mut build: impl FnMut(N, Vec<T>, usize) -> Result<T, E>,
) -> Result<T, E> {
    let mut pending = children(&mut root, 0)?;
    pending.reverse();
    let mut current = Frame {
        node: root,
        pending,
        built: Vec::new(),
        depth: 0,
    };
    let mut parents: Vec<Frame<N, T>> = Vec::new();

    loop {
        if let Some(mut child) = current.pending.pop() {
            let depth = current.depth + 1;
            let mut grandchildren = children(&mut child, depth)?;
            grandchildren.reverse();
            let parent = std::mem::replace(
                &mut current,
                Frame {
                    node: child,
                    pending: grandchildren,
                    built: Vec::new(),
                    depth,
                },
            );
            parents.push(parent);
            continue;
        }

        let value = build(current.node, current.built, current.depth)?;
        match parents.pop() {
            Some(mut parent) => {
                parent.built.push(value);
                current = parent;
            }
            None => return Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(value: &'static str) -> Node<&'static str> {
        Node {
            value,
            children: Vec::new(),
        }
    }

    fn sample() -> Node<&'static str> {
        Node {
            value: "culture",
            children: vec![
                Node {
                    value: "E. coli",
                    children: vec![leaf("ampicillin"), leaf("gentamicin")],
                },
                leaf("gram stain"),
            ],
        }
    }

    #[test]
    fn fold_visits_children_in_order_before_parent() {
        let mut order = Vec::new();
        let rendered = fold_tree(
            sample(),
            |node, _| Ok::<_, ()>(std::mem::take(&mut node.children)),
            |node, children: Vec<String>, _| {
                order.push(node.value);
                Ok(if children.is_empty() {
                    node.value.to_string()
                } else {
                    format!("{}({})", node.value, children.join(","))
                })
            },
        )
        .expect("fold");

        assert_eq!(
            rendered,
            "culture(E. coli(ampicillin,gentamicin),gram stain)"
        );
        assert_eq!(
            order,
            vec!["ampicillin", "gentamicin", "E. coli", "gram stain", "culture"]
        );
    }

    #[test]
    fn try_map_reports_leaves_and_depth() {
        let mapped = sample()
            .try_map(|value, is_leaf, depth| Ok::<_, ()>((value, is_leaf, depth)))
            .expect("map");

        assert_eq!(mapped.value, ("culture", false, 0));
        assert_eq!(mapped.children[0].value, ("E. coli", false, 1));
        assert_eq!(mapped.children[0].children[1].value, ("gentamicin", true, 2));
        assert_eq!(mapped.children[1].value, ("gram stain", true, 1));
    }

    #[test]
    fn first_error_stops_the_fold() {
        let result = fold_tree(
            0u32,
            |n, depth| {
                if depth > 3 {
                    Err(format!("too deep at {n}"))
                } else {
                    Ok(vec![*n + 1])
                }
            },
            |n, _: Vec<u32>, _| Ok(n),
        );
        assert_eq!(result, Err("too deep at 4".to_string()));
    }

    #[test]
    fn deep_chains_do_not_overflow_the_stack() {
        let depth = fold_tree(
            0usize,
            |n, _| Ok::<_, ()>(if *n < 100_000 { vec![*n + 1] } else { Vec::new() }),
            |_, children: Vec<usize>, _| Ok(children.first().map_or(1, |d| d + 1)),
        )
        .expect("fold");
        assert_eq!(depth, 100_001);
    }
}
