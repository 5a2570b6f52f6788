pub mod compiler;
pub mod diagnostics;
pub mod lexer;

#[cfg(test)]
mod tests {
    use crate::backend::vm::heap::Heap;
    use crate::frontend::compiler::compile;

    #[test]
    fn it_compiles() {
        let mut heap = Heap::new();
        let result = compile(
            "
        local function hello_world()
            print(\"Hello, World!\")
        end
        local function fake_closure()
            return function(x, y)
                return x + y
            end
        end
        if true then
            local test = 123
            print(test)
        else
            print(456)
        end
        local x = 10 + 20 * (30 - 5)
        while x < 200 do
            x = x + 1
        end
        repeat
            x = x + 2
        until x >= 300
        local tbl = {1, 2, 3, a = 4}
        tbl.hello = \"world\"
        tbl[2] = 3
        print(tbl[\"hello\"])
        print(tbl.a)
        print(tbl[1])
        print(#tbl)
        hello_world()
        print(fake_closure()(1, 2))
        ",
            "frontend_smoke.mlx",
            &mut heap,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn class_and_trait_sources_compile() {
        let mut heap = Heap::new();
        let result = compile(
            "
        trait Greets
            function hello(self_name)
                return \"hi \" .. self_name
            end
        end
        class Animal
            function init(name)
                self.name = name
            end
            function speak()
                return self.name
            end
        end
        class Dog extends Animal implements Greets
            function speak()
                return super.speak() .. \" woof\"
            end
            private function secret()
                return 1
            end
        end
        local d = new Dog(\"rex\")
        print(d:speak())
        print(d.hello(\"rex\"))
        ",
            "frontend_oop.mlx",
            &mut heap,
        );
        assert!(result.is_ok());
    }
}
